//! Online filters used to condition a station stream before it is migrated.
//!
//! Every filter owns the memory it needs to continue seamlessly across packet
//! boundaries. Zero-length packets pass through as empty packets and leave that
//! memory untouched.

pub mod convolve;
pub mod elementwise;
pub mod kurtosis;
pub mod recursive;

pub use convolve::ConvolutionFilter;
pub use elementwise::{ClampNegative, Differentiate, Offset, Scale};
pub use kurtosis::SlidingKurtosis;
pub use recursive::{MomentState, NormalizedDeviation, RecursiveMean, RecursiveVariance};

use crate::prelude::{PipelineResult, RealtimeFilter, WaveformPacket};
use serde::{Deserialize, Serialize};

/// Serializable description of one filter in a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterSpec {
    NegToZero,
    Scale { factor: f64 },
    Offset { value: f64 },
    Differentiate,
    Mean { win: f64 },
    Variance { win: f64 },
    Dx2 { win: f64 },
    Convolve { kernel: Vec<f64> },
    Kurtosis { win: f64 },
}

impl FilterSpec {
    pub fn build(&self) -> PipelineResult<Box<dyn RealtimeFilter>> {
        Ok(match self {
            FilterSpec::NegToZero => Box::new(ClampNegative),
            FilterSpec::Scale { factor } => Box::new(Scale { factor: *factor }),
            FilterSpec::Offset { value } => Box::new(Offset { value: *value }),
            FilterSpec::Differentiate => Box::new(Differentiate::default()),
            FilterSpec::Mean { win } => Box::new(RecursiveMean::new(*win)?),
            FilterSpec::Variance { win } => Box::new(RecursiveVariance::new(*win)?),
            FilterSpec::Dx2 { win } => Box::new(NormalizedDeviation::new(*win)?),
            FilterSpec::Convolve { kernel } => Box::new(ConvolutionFilter::real(kernel)?),
            FilterSpec::Kurtosis { win } => Box::new(SlidingKurtosis::new(*win)?),
        })
    }
}

/// Ordered filters applied to one logical stream, each with private memory.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn RealtimeFilter>>,
}

impl FilterChain {
    pub fn from_specs(specs: &[FilterSpec]) -> PipelineResult<Self> {
        let filters = specs
            .iter()
            .map(FilterSpec::build)
            .collect::<PipelineResult<Vec<_>>>()?;
        Ok(Self { filters })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Runs the packet through every filter in order. Memory is committed only if
    /// every filter succeeds; a rejected packet leaves the whole chain as it was.
    pub fn process(&mut self, packet: &WaveformPacket) -> PipelineResult<WaveformPacket> {
        let mut staged: Vec<Box<dyn RealtimeFilter>> =
            self.filters.iter().map(|f| f.box_clone()).collect();
        let mut current = packet.clone();
        for filter in &mut staged {
            current = filter.apply(&current)?;
        }
        self.filters = staged;
        Ok(current)
    }

    pub fn reset(&mut self) {
        self.filters.iter_mut().for_each(|f| f.reset());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_builds_from_yaml_style_specs() {
        let specs: Vec<FilterSpec> = serde_json::from_str(
            r#"[{"kind":"scale","factor":2.0},{"kind":"kurtosis","win":0.5},
                {"kind":"differentiate"},{"kind":"neg_to_zero"}]"#,
        )
        .unwrap();
        let chain = FilterChain::from_specs(&specs).unwrap();
        assert_eq!(
            chain.names(),
            vec!["scale", "kurtosis", "differentiate", "neg_to_zero"]
        );
    }

    #[test]
    fn failing_filter_leaves_earlier_memory_untouched() {
        let specs = vec![FilterSpec::Mean { win: 1.0 }, FilterSpec::Dx2 { win: 1.0 }];
        let mut chain = FilterChain::from_specs(&specs).unwrap();
        let mut reference = FilterChain::from_specs(&specs).unwrap();

        // the mean starts at 0, so dx2 seeds mu2 with 0 and fails on the first sample
        let bad = WaveformPacket::new("ST", 0.0, 0.1, vec![0.0, 4.0, 4.0]);
        assert!(matches!(
            chain.process(&bad),
            Err(crate::prelude::PipelineError::NumericDomain(_))
        ));

        let data = WaveformPacket::new("ST", 0.5, 0.1, vec![1.0, 2.0, 0.5, 3.0]);
        assert_eq!(
            chain.process(&data).unwrap().samples(),
            reference.process(&data).unwrap().samples()
        );
    }

    #[test]
    fn invalid_spec_fails_the_whole_chain() {
        let specs = vec![
            FilterSpec::Scale { factor: 1.0 },
            FilterSpec::Convolve {
                kernel: vec![1.0, 1.0],
            },
        ];
        assert!(FilterChain::from_specs(&specs).is_err());
    }

    #[test]
    fn kurtosis_gradient_chain_is_split_invariant() {
        let specs = vec![
            FilterSpec::Scale { factor: 0.5 },
            FilterSpec::Kurtosis { win: 0.2 },
            FilterSpec::Differentiate,
            FilterSpec::NegToZero,
        ];
        let data: Vec<f64> = (0..300)
            .map(|i| if i == 150 { 20.0 } else { ((i * 13) % 7) as f64 - 3.0 })
            .collect();

        let mut single = FilterChain::from_specs(&specs).unwrap();
        let whole = single
            .process(&WaveformPacket::new("ST", 0.0, 0.01, data.clone()))
            .unwrap();

        let mut split = FilterChain::from_specs(&specs).unwrap();
        let mut pieces = Vec::new();
        for (i, chunk) in data.chunks(100).enumerate() {
            let packet = WaveformPacket::new("ST", i as f64, 0.01, chunk.to_vec());
            pieces.extend_from_slice(split.process(&packet).unwrap().samples());
        }

        assert_eq!(whole.len(), pieces.len());
        for (a, b) in whole.samples().iter().zip(&pieces) {
            assert!((a - b).abs() < 1e-9);
        }
        assert!(pieces.iter().all(|&v| v >= 0.0));
    }
}
