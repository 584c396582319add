use crate::distribution::distributor::Distributor;
use crate::interface::{Delivery, Message, RoutingKey};
use crate::prelude::{PipelineError, PipelineResult};
use crate::processing::{FilterChain, FilterSpec};
use std::collections::HashMap;

/// What happened to one ingestion delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Distributed(usize),
    Terminated(usize),
    Ignored,
}

struct StationStream {
    chain: FilterChain,
    closed: bool,
}

/// Owns the preprocessing state of the stations assigned to one worker and hands
/// conditioned packets to the distributor.
pub struct StationProcessor {
    distributor: Distributor,
    preprocessing: Vec<FilterSpec>,
    streams: HashMap<String, StationStream>,
}

impl StationProcessor {
    pub fn new(distributor: Distributor, preprocessing: Vec<FilterSpec>) -> PipelineResult<Self> {
        // fail on bad filter parameters before any data flows
        FilterChain::from_specs(&preprocessing)?;
        Ok(Self {
            distributor,
            preprocessing,
            streams: HashMap::new(),
        })
    }

    fn stream(&mut self, station: &str) -> PipelineResult<&mut StationStream> {
        if !self.streams.contains_key(station) {
            let chain = FilterChain::from_specs(&self.preprocessing)?;
            self.streams.insert(
                station.to_string(),
                StationStream {
                    chain,
                    closed: false,
                },
            );
        }
        self.streams
            .get_mut(station)
            .ok_or_else(|| PipelineError::Internal(format!("stream {station} vanished")))
    }

    pub fn is_closed(&self, station: &str) -> bool {
        self.streams.get(station).map(|s| s.closed).unwrap_or(false)
    }

    pub fn handle(&mut self, delivery: &Delivery) -> PipelineResult<IngestOutcome> {
        let RoutingKey::Station(station) = &delivery.key else {
            return Err(PipelineError::InvalidInput(format!(
                "ingestion got key {}",
                delivery.key
            )));
        };
        if let Message::Data(packet) = &delivery.message {
            if packet.station() != station {
                return Err(PipelineError::InvalidInput(format!(
                    "packet for {} routed as {}",
                    packet.station(),
                    station
                )));
            }
        }
        // stations outside the grid feed nothing and keep no state here
        if !self.distributor.feeds(station) {
            return match &delivery.message {
                Message::Stop => Ok(IngestOutcome::Terminated(
                    self.distributor.terminate(station)?,
                )),
                Message::Data(packet) => Ok(IngestOutcome::Distributed(
                    self.distributor.distribute(packet)?,
                )),
            };
        }
        let stream = self.stream(station)?;
        if stream.closed {
            return Ok(IngestOutcome::Ignored);
        }
        match &delivery.message {
            Message::Stop => {
                stream.closed = true;
                stream.chain.reset();
                let sent = self.distributor.terminate(station)?;
                Ok(IngestOutcome::Terminated(sent))
            }
            Message::Data(packet) => {
                let conditioned = stream.chain.process(packet)?;
                let sent = self.distributor.distribute(&conditioned)?;
                Ok(IngestOutcome::Distributed(sent))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{Publisher, RecordingPublisher};
    use crate::prelude::WaveformPacket;
    use crate::traveltime::table::tests::row;
    use crate::traveltime::{InMemorySource, TravelTimeStore};
    use std::sync::Arc;

    fn processor(specs: Vec<FilterSpec>) -> (StationProcessor, Arc<RecordingPublisher>) {
        let source = Arc::new(InMemorySource::new(vec![row("A", vec![0.0, 0.02])]));
        let store = Arc::new(TravelTimeStore::open(source).unwrap());
        let publisher = Arc::new(RecordingPublisher::new());
        let sink: Arc<dyn Publisher> = publisher.clone();
        let processor = StationProcessor::new(Distributor::new(store, sink), specs).unwrap();
        (processor, publisher)
    }

    fn data(tag: u64, station: &str, samples: Vec<f64>) -> Delivery {
        Delivery {
            tag,
            key: RoutingKey::Station(station.into()),
            message: Message::Data(WaveformPacket::new(station, 0.0, 0.01, samples)),
        }
    }

    #[test]
    fn preprocessing_runs_before_fan_out() {
        let (mut processor, publisher) = processor(vec![FilterSpec::NegToZero]);
        let outcome = processor.handle(&data(1, "A", vec![-1.0, 2.0])).unwrap();
        assert_eq!(outcome, IngestOutcome::Distributed(2));
        for (_, message) in publisher.take() {
            match message {
                Message::Data(packet) => assert_eq!(packet.samples(), &[0.0, 2.0]),
                Message::Stop => panic!("unexpected sentinel"),
            }
        }
    }

    #[test]
    fn input_after_sentinel_is_ignored() {
        let (mut processor, publisher) = processor(Vec::new());
        let stop = Delivery {
            tag: 1,
            key: RoutingKey::Station("A".into()),
            message: Message::Stop,
        };
        assert_eq!(processor.handle(&stop).unwrap(), IngestOutcome::Terminated(2));
        assert!(processor.is_closed("A"));
        assert_eq!(processor.handle(&stop).unwrap(), IngestOutcome::Ignored);
        assert_eq!(
            processor.handle(&data(2, "A", vec![1.0])).unwrap(),
            IngestOutcome::Ignored
        );
        assert_eq!(publisher.take().len(), 2);
    }

    #[test]
    fn unknown_station_gets_no_stream_state() {
        let (mut processor, publisher) = processor(vec![FilterSpec::Mean { win: 1.0 }]);
        for tag in 0..3 {
            assert_eq!(
                processor.handle(&data(tag, "Q", vec![1.0])).unwrap(),
                IngestOutcome::Distributed(0)
            );
        }
        let stop = Delivery {
            tag: 3,
            key: RoutingKey::Station("Q".into()),
            message: Message::Stop,
        };
        assert_eq!(processor.handle(&stop).unwrap(), IngestOutcome::Terminated(0));
        assert!(processor.streams.is_empty());
        assert!(publisher.take().is_empty());

        processor.handle(&data(4, "A", vec![1.0])).unwrap();
        assert_eq!(processor.streams.len(), 1);
    }

    #[test]
    fn bad_preprocessing_fails_at_construction() {
        let source = Arc::new(InMemorySource::new(vec![row("A", vec![0.0])]));
        let store = Arc::new(TravelTimeStore::open(source).unwrap());
        let sink: Arc<dyn Publisher> = Arc::new(RecordingPublisher::new());
        let result = StationProcessor::new(
            Distributor::new(store, sink),
            vec![FilterSpec::Mean { win: -1.0 }],
        );
        assert!(result.is_err());
    }
}
