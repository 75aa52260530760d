//! # Logging subscriber.
//!
//! [`LogWriter`] renders bus events through `tracing`, one line per event:
//!
//! ```text
//! INFO  racetimer: queue changed op=insert
//! INFO  racetimer: observer changed track=main op=stop
//! WARN  racetimer: replay rewound track=main failures=1
//! INFO  racetimer: service started service=vlc pid=4242
//! WARN  racetimer: service exited service=sensor status="exit status: 1"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};

use super::Subscribe;

/// `tracing`-backed event logger.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let source = e.source.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::PendingCarQueueChanged => debug!(seq = e.seq, op = reason, "queue changed"),
            EventKind::RunningObserverChanged => {
                info!(seq = e.seq, track = source, op = reason, "observer changed")
            }
            EventKind::RecordsChanged => {
                debug!(seq = e.seq, record = source, op = reason, "records changed")
            }
            EventKind::ReplayRewound => {
                warn!(seq = e.seq, track = source, failures = reason, "replay rewound")
            }
            EventKind::ServiceStarting => info!(service = source, "service starting"),
            EventKind::ServiceStarted => info!(service = source, pid = reason, "service started"),
            EventKind::ServiceStopping => info!(service = source, "service stopping"),
            EventKind::ServiceStopped => info!(service = source, "service stopped"),
            EventKind::ServiceExited => warn!(service = source, status = reason, "service exited"),
            EventKind::ServiceFailed => error!(service = source, err = reason, "service failed"),
            EventKind::SubscriberPanicked => {
                error!(subscriber = source, panic = reason, "subscriber panicked")
            }
            EventKind::SubscriberOverflow => {
                warn!(subscriber = source, reason, "subscriber overflow")
            }
            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::AllStoppedWithin => info!("all services stopped within grace"),
            EventKind::GraceExceeded => error!(stuck = reason, "grace exceeded"),
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
