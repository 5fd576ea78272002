//! distribution helpers for p-values - normal & chi-square tails

/// two-sided 95% normal quantile used for every interval in the report
pub const Z_95: f64 = 1.96;

/// complementary error function, fractional error < 1.2e-7 everywhere
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let ans = t * poly.exp();
    if x >= 0.0 { ans } else { 2.0 - ans }
}

/// standard normal cdf
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// two-sided p-value for a wald z statistic
pub fn normal_two_sided_p(z: f64) -> f64 {
    if !z.is_finite() {
        return 0.0;
    }
    erfc(z.abs() / std::f64::consts::SQRT_2).clamp(0.0, 1.0)
}

/// log gamma via lanczos (g = 7, n = 9)
pub fn ln_gamma(x: f64) -> f64 {
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // reflection
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut acc = COEF[0];
    let t = x + 7.5;
    for (i, &c) in COEF.iter().enumerate().skip(1) {
        acc += c / (x + i as f64);
    }
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

const GAMMA_EPS: f64 = 1e-14;
const GAMMA_MAX_ITER: usize = 500;

// P(a, x) by series, good for x < a + 1
fn gamma_p_series(a: f64, x: f64) -> f64 {
    let mut sum = 1.0 / a;
    let mut term = sum;
    let mut ap = a;
    for _ in 0..GAMMA_MAX_ITER {
        ap += 1.0;
        term *= x / ap;
        sum += term;
        if term.abs() < sum.abs() * GAMMA_EPS {
            break;
        }
    }
    sum * (-x + a * x.ln() - ln_gamma(a)).exp()
}

// Q(a, x) by lentz continued fraction, good for x >= a + 1
fn gamma_q_continued_fraction(a: f64, x: f64) -> f64 {
    let tiny = 1e-300;
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / tiny;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..=GAMMA_MAX_ITER {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < tiny {
            d = tiny;
        }
        c = b + an / c;
        if c.abs() < tiny {
            c = tiny;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < GAMMA_EPS {
            break;
        }
    }
    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}

/// regularized upper incomplete gamma Q(a, x)
pub fn gamma_q(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    if x < a + 1.0 {
        1.0 - gamma_p_series(a, x)
    } else {
        gamma_q_continued_fraction(a, x)
    }
}

/// upper tail of a chi-square with `df` degrees of freedom
pub fn chi_square_sf(statistic: f64, df: usize) -> f64 {
    if df == 0 || !statistic.is_finite() {
        return if statistic.is_finite() { 1.0 } else { 0.0 };
    }
    gamma_q(df as f64 / 2.0, statistic / 2.0).clamp(0.0, 1.0)
}

/// p-value display the way clinical tables print them
pub fn format_p_value(p: f64) -> String {
    if p < 0.001 {
        "<0.001".to_string()
    } else if p < 0.01 {
        format!("{:.3}", p)
    } else {
        format!("{:.2}", p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normal_cdf_known_values() {
        assert_relative_eq!(normal_cdf(0.0), 0.5, epsilon = 1e-7);
        assert_relative_eq!(normal_cdf(1.96), 0.975_002_1, epsilon = 1e-6);
        assert_relative_eq!(normal_cdf(-1.0), 0.158_655_25, epsilon = 1e-6);
    }

    #[test]
    fn test_two_sided_p() {
        assert_relative_eq!(normal_two_sided_p(1.96), 0.049_995_8, epsilon = 1e-5);
        assert_relative_eq!(normal_two_sided_p(-1.96), normal_two_sided_p(1.96), epsilon = 1e-12);
        assert_relative_eq!(normal_two_sided_p(0.0), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ln_gamma() {
        assert_relative_eq!(ln_gamma(1.0), 0.0, epsilon = 1e-12);
        assert_relative_eq!(ln_gamma(5.0), 24f64.ln(), epsilon = 1e-12);
        assert_relative_eq!(ln_gamma(0.5), std::f64::consts::PI.sqrt().ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_chi_square_tail() {
        // qchisq(0.95, df) reference values
        assert_relative_eq!(chi_square_sf(3.841_459, 1), 0.05, epsilon = 1e-6);
        assert_relative_eq!(chi_square_sf(5.991_465, 2), 0.05, epsilon = 1e-6);
        assert_relative_eq!(chi_square_sf(18.307_04, 10), 0.05, epsilon = 1e-6);
        // df = 2 has a closed form
        assert_relative_eq!(chi_square_sf(4.0, 2), (-2.0f64).exp(), epsilon = 1e-10);
        assert_eq!(chi_square_sf(0.0, 3), 1.0);
    }

    #[test]
    fn test_format_p_value() {
        assert_eq!(format_p_value(0.0004), "<0.001");
        assert_eq!(format_p_value(0.0042), "0.004");
        assert_eq!(format_p_value(0.456), "0.46");
    }
}
