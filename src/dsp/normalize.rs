use crate::config::{OutOfRangePolicy, PipelineSettings};
use crate::dsp::PipelineError;

/// Maps raw ADC codes onto the board's reference voltage.
#[derive(Clone, Copy, Debug)]
pub struct VoltageNormalizer {
    adc_max: u32,
    vref: f64,
    policy: OutOfRangePolicy,
}
impl VoltageNormalizer {
    pub fn new(adc_max: u32, vref: f64, policy: OutOfRangePolicy) -> Self {
        Self {
            adc_max,
            vref,
            policy,
        }
    }
    pub fn from_settings(settings: &PipelineSettings) -> Self {
        Self::new(settings.adc_max, settings.vref, settings.out_of_range)
    }
    /// `voltage = code / adc_max * vref`.
    ///
    /// Codes outside `[0, adc_max]` are rejected under [`OutOfRangePolicy::Drop`]
    /// and saturated under [`OutOfRangePolicy::Clamp`].
    pub fn normalize(&self, code: i64) -> Result<f64, PipelineError> {
        let max = i64::from(self.adc_max);
        let code = if (0..=max).contains(&code) {
            code
        } else {
            match self.policy {
                OutOfRangePolicy::Drop => {
                    return Err(PipelineError::CodeOutOfRange {
                        code,
                        adc_max: self.adc_max,
                    })
                }
                OutOfRangePolicy::Clamp => code.clamp(0, max),
            }
        };
        Ok(code as f64 / self.adc_max as f64 * self.vref)
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    fn board() -> VoltageNormalizer {
        VoltageNormalizer::new(4095, 3.3, OutOfRangePolicy::Drop)
    }
    #[test]
    fn matches_formula_and_is_monotonic() {
        let n = board();
        let mut previous = -1.0;
        for code in 0..=4095 {
            let v = n.normalize(code).unwrap();
            assert!((v - code as f64 / 4095.0 * 3.3).abs() < 1e-12);
            assert!(v > previous);
            previous = v;
        }
        assert_eq!(n.normalize(0).unwrap(), 0.0);
        assert!((n.normalize(4095).unwrap() - 3.3).abs() < 1e-12);
    }
    #[test]
    fn drop_policy_rejects_out_of_range() {
        let n = board();
        assert!(matches!(
            n.normalize(-1),
            Err(PipelineError::CodeOutOfRange { code: -1, .. })
        ));
        assert!(n.normalize(4096).is_err());
    }
    #[test]
    fn clamp_policy_saturates() {
        let n = VoltageNormalizer::new(4095, 3.3, OutOfRangePolicy::Clamp);
        assert_eq!(n.normalize(-20).unwrap(), 0.0);
        assert!((n.normalize(70_000).unwrap() - 3.3).abs() < 1e-12);
    }
}
