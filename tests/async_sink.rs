//! Exercises the pipeline's sink traits under an async fan-out to multiple
//! subscribers via `tokio::sync::broadcast`. The pipeline itself stays
//! synchronous; this only checks that a collaborator can bridge
//! `Pipeline::ingest_hex` output into an async broadcast channel without the
//! trait objects getting in the way.

use adsb_core::{
    DecodedMessage, Event, NotificationSink, Pipeline, PipelineConfig, PositionUpdate,
    PersistenceSink, SinkError,
};
use tokio::sync::broadcast;

struct BroadcastPersistence {
    tx: broadcast::Sender<PositionUpdate>,
}

impl PersistenceSink for BroadcastPersistence {
    fn record_position(&mut self, update: &PositionUpdate) -> Result<(), SinkError> {
        // A lagging or absent receiver is not a pipeline-level failure.
        let _ = self.tx.send(update.clone());
        Ok(())
    }
}

struct BroadcastNotifications {
    tx: broadcast::Sender<Event>,
}

impl NotificationSink for BroadcastNotifications {
    fn notify(&mut self, event: &Event) -> Result<(), SinkError> {
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

#[tokio::test]
async fn position_updates_fan_out_to_broadcast_subscribers() {
    let (pos_tx, mut pos_rx) = broadcast::channel(16);
    let (evt_tx, _evt_rx) = broadcast::channel(16);

    let mut pipeline = Pipeline::new(PipelineConfig::default(), Vec::new())
        .with_persistence(Box::new(BroadcastPersistence { tx: pos_tx }))
        .with_notifications(Box::new(BroadcastNotifications { tx: evt_tx }));

    // Odd then even CPR frame for the same aircraft resolves a position on
    // the second call, same pair used in the unit tests.
    pipeline.ingest_hex("8D40621D58C386435CC412692AD6", 0.5, None);
    let outcome = pipeline.ingest_hex("8D40621D58C382D690C8AC2863A7", 1.0, None);
    assert!(matches!(outcome.message, Some(DecodedMessage::Position { .. })));

    let update = tokio::time::timeout(std::time::Duration::from_millis(100), pos_rx.recv())
        .await
        .expect("no timeout")
        .expect("broadcast not closed");

    assert!((update.lat - 52.2572).abs() < 0.1);
    assert!((update.lon - 3.9194).abs() < 0.1);
}
