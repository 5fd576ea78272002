use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use crate::error::{SurvError, Result};

/// everyone who died at one time in one stratum, plus who was still at risk
#[derive(Debug, Clone)]
pub struct EventGroup {
    pub stratum: usize,
    pub time: f64,
    pub deaths: Vec<usize>,
    pub at_risk: Vec<usize>,
}

/// survival data - times, events, covariate matrix & optional strata
#[derive(Debug, Clone)]
pub struct SurvivalData {
    times: Array1<f64>,              // time to event/censoring
    events: Vec<bool>,               // true = event, false = censored
    covariates: Array2<f64>,         // n_samples x n_features
    strata: Vec<usize>,              // stratum code per sample, all 0 when unstratified
    event_groups: Vec<EventGroup>,   // precomputed, ordered by (stratum, time)
}

impl SurvivalData {
    /// make new survival data from raw vecs/arrays
    pub fn new(
        times: Vec<f64>,
        events: Vec<bool>,
        covariates: Array2<f64>,
    ) -> Result<Self> {
        let n_samples = times.len();
        Self::with_strata(times, events, covariates, vec![0; n_samples])
    }

    /// same as `new`, with a baseline-hazard stratum per sample
    pub fn with_strata(
        times: Vec<f64>,
        events: Vec<bool>,
        covariates: Array2<f64>,
        strata: Vec<usize>,
    ) -> Result<Self> {
        let n_samples = times.len();

        if events.len() != n_samples {
            return Err(SurvError::invalid_dimensions(
                format!("times len ({}) != events len ({})", n_samples, events.len())
            ));
        }

        if covariates.nrows() != n_samples {
            return Err(SurvError::invalid_dimensions(
                format!("covariates rows ({}) != n_samples ({})", covariates.nrows(), n_samples)
            ));
        }

        if strata.len() != n_samples {
            return Err(SurvError::invalid_dimensions(
                format!("strata len ({}) != n_samples ({})", strata.len(), n_samples)
            ));
        }

        if n_samples == 0 {
            return Err(SurvError::invalid_survival_data("no samples"));
        }

        if times.iter().any(|&t| t < 0.0 || !t.is_finite()) {
            return Err(SurvError::invalid_survival_data(
                "survival times must be non-negative & finite"
            ));
        }

        let mut data = Self {
            times: Array1::from(times),
            events,
            covariates,
            strata,
            event_groups: Vec::new(),
        };

        data.compute_event_groups();
        Ok(data)
    }

    /// precompute death sets & risk sets for each (stratum, event time)
    fn compute_event_groups(&mut self) {
        let mut order: Vec<usize> = (0..self.n_samples()).collect();
        order.sort_by(|&a, &b| {
            self.strata[a]
                .cmp(&self.strata[b])
                .then(self.times[a].total_cmp(&self.times[b]))
        });

        self.event_groups.clear();
        let mut i = 0;
        while i < order.len() {
            let stratum = self.strata[order[i]];
            let time = self.times[order[i]];

            let mut j = i;
            let mut deaths = Vec::new();
            while j < order.len() && self.strata[order[j]] == stratum && self.times[order[j]] == time {
                if self.events[order[j]] {
                    deaths.push(order[j]);
                }
                j += 1;
            }

            if !deaths.is_empty() {
                // everyone in the stratum who hasn't left before this time
                let at_risk: Vec<usize> = order[i..]
                    .iter()
                    .copied()
                    .take_while(|&k| self.strata[k] == stratum)
                    .collect();
                self.event_groups.push(EventGroup { stratum, time, deaths, at_risk });
            }
            i = j;
        }
    }

    /// how many patients
    pub fn n_samples(&self) -> usize {
        self.times.len()
    }

    /// how many features per patient
    pub fn n_features(&self) -> usize {
        self.covariates.ncols()
    }

    /// survival/censoring times
    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    /// event indicators (true = event, false = censored)
    pub fn events(&self) -> &[bool] {
        &self.events
    }

    /// patient feature matrix
    pub fn covariates(&self) -> ArrayView2<'_, f64> {
        self.covariates.view()
    }

    pub fn strata(&self) -> &[usize] {
        &self.strata
    }

    pub fn n_strata(&self) -> usize {
        self.strata.iter().copied().max().map_or(0, |m| m + 1)
    }

    /// precomputed death/risk sets for the optimizer
    pub fn event_groups(&self) -> &[EventGroup] {
        &self.event_groups
    }

    pub fn n_events(&self) -> usize {
        self.events.iter().filter(|&&e| e).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_data() -> SurvivalData {
        let times = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let events = vec![true, false, true, true, false];
        let covariates = Array2::from_shape_vec((5, 2), vec![
            1.0, 2.0,
            3.0, 4.0,
            5.0, 6.0,
            7.0, 8.0,
            9.0, 10.0,
        ]).unwrap();

        SurvivalData::new(times, events, covariates).unwrap()
    }

    #[test]
    fn test_survival_data_creation() {
        let data = create_test_data();
        assert_eq!(data.n_samples(), 5);
        assert_eq!(data.n_features(), 2);
        assert_eq!(data.n_events(), 3);
        assert_eq!(data.n_strata(), 1);
    }

    #[test]
    fn test_invalid_dimensions() {
        let times = vec![1.0, 2.0];
        let events = vec![true];  // wrong length
        let covariates = Array2::zeros((2, 2));

        assert!(SurvivalData::new(times, events, covariates).is_err());
    }

    #[test]
    fn test_invalid_times() {
        let times = vec![-1.0, 2.0];
        let events = vec![true, false];
        let covariates = Array2::zeros((2, 2));

        assert!(SurvivalData::new(times, events, covariates).is_err());
    }

    #[test]
    fn test_event_groups_hold_ties_and_risk_sets() {
        let times = vec![2.0, 1.0, 2.0, 3.0, 2.0];
        let events = vec![true, true, true, false, false];
        let data = SurvivalData::new(times, events, Array2::zeros((5, 1))).unwrap();

        let groups = data.event_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].time, 1.0);
        assert_eq!(groups[0].at_risk.len(), 5);
        assert_eq!(groups[1].time, 2.0);
        let mut deaths = groups[1].deaths.clone();
        deaths.sort();
        assert_eq!(deaths, vec![0, 2]);
        // censored at 2.0 is still at risk at 2.0
        assert_eq!(groups[1].at_risk.len(), 4);
    }

    #[test]
    fn test_strata_split_risk_sets() {
        let times = vec![1.0, 2.0, 1.5, 3.0];
        let events = vec![true, true, true, true];
        let data = SurvivalData::with_strata(times, events, Array2::zeros((4, 1)), vec![0, 0, 1, 1]).unwrap();

        assert_eq!(data.n_strata(), 2);
        let groups = data.event_groups();
        assert_eq!(groups.len(), 4);
        assert!(groups.iter().all(|g| g.at_risk.iter().all(|&i| data.strata()[i] == g.stratum)));
        assert_eq!(groups[0].at_risk.len(), 2);
        assert_eq!(groups[2].at_risk.len(), 2);
    }
}
