use std::sync::Arc;

use dsf_concurrent::{RequestMonitor, Sequence, Step};

use crate::service::Service;
use crate::session::DsfSession;

struct InitializeStep {
    session: DsfSession,
    service: Arc<dyn Service>,
}

impl Step for InitializeStep {
    fn name(&self) -> &str {
        self.service.name()
    }

    fn execute(&mut self, rm: RequestMonitor) {
        Arc::clone(&self.service).initialize(&self.session, rm);
    }

    fn rollback(&mut self, rm: RequestMonitor) {
        Arc::clone(&self.service).shutdown(&self.session, rm);
    }
}

struct ShutdownStep {
    session: DsfSession,
    service: Arc<dyn Service>,
}

impl Step for ShutdownStep {
    fn name(&self) -> &str {
        self.service.name()
    }

    fn execute(&mut self, rm: RequestMonitor) {
        // One service failing to shut down must not keep the others alive.
        let name = self.service.name().to_owned();
        let session = self.session.id();
        let tolerant = RequestMonitor::new(self.session.executor(), move |completion| {
            if !completion.is_success() {
                tracing::warn!(
                    target: "dsf.session",
                    %session,
                    service = %name,
                    status = %completion.status(),
                    "service shutdown failed"
                );
            }
            rm.done();
        });
        Arc::clone(&self.service).shutdown(&self.session, tolerant);
    }
}

/// Initializes `services` in order.
///
/// If one fails, the services already initialized (and the failing one) are
/// shut down in reverse order and `rm` completes with the failure.
pub fn startup_sequence(
    session: &DsfSession,
    services: Vec<Arc<dyn Service>>,
    rm: RequestMonitor,
) -> Sequence {
    let steps = services
        .into_iter()
        .map(|service| {
            Box::new(InitializeStep {
                session: session.clone(),
                service,
            }) as Box<dyn Step>
        })
        .collect();
    Sequence::new(session.executor(), steps, rm)
}

/// Shuts `services` down in reverse order. Individual failures are logged and
/// do not stop the sequence.
pub fn shutdown_sequence(
    session: &DsfSession,
    services: Vec<Arc<dyn Service>>,
    rm: RequestMonitor,
) -> Sequence {
    let steps = services
        .into_iter()
        .rev()
        .map(|service| {
            Box::new(ShutdownStep {
                session: session.clone(),
                service,
            }) as Box<dyn Step>
        })
        .collect();
    Sequence::new(session.executor(), steps, rm)
}
