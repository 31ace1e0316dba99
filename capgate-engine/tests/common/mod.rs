//! Shared harness for engine integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use capgate_api::{Capability, PlatformFacts, RequestOutcome};
use capgate_engine::audit::MemoryAuditSink;
use capgate_engine::event::{EventReceiver, EventSender};
use capgate_engine::gateway::ScriptedGateway;
use capgate_engine::presenter::ScriptedPresenter;
use capgate_engine::{event_channel, HostConfig, RequestHost};

pub struct Harness {
    pub host: RequestHost,
    pub events: EventReceiver,
    pub gateway: ScriptedGateway,
    pub presenter: ScriptedPresenter,
    pub audit: Arc<MemoryAuditSink>,
    pub outcome: Rc<RefCell<Option<RequestOutcome>>>,
    pub finals: Rc<RefCell<usize>>,
}

impl Harness {
    pub fn new(
        facts: PlatformFacts,
        script: impl FnOnce(ScriptedGateway) -> ScriptedGateway,
        presenter: impl FnOnce(EventSender) -> ScriptedPresenter,
    ) -> Self {
        let (tx, events) = event_channel();
        let gateway = script(ScriptedGateway::new(facts, tx.clone()));
        let presenter = presenter(tx);
        let audit = Arc::new(MemoryAuditSink::new());
        let config = HostConfig::builder()
            .app_name("capgate-test")
            .shared_audit(audit.clone())
            .round_limit(4)
            .build()
            .unwrap();
        let host = RequestHost::new(gateway.clone(), presenter.clone(), config);

        Self {
            host,
            events,
            gateway,
            presenter,
            audit,
            outcome: Rc::new(RefCell::new(None)),
            finals: Rc::new(RefCell::new(0)),
        }
    }

    /// Final callback that stores the outcome and counts invocations
    pub fn on_final(&self) -> impl FnOnce(RequestOutcome) + 'static {
        let slot = self.outcome.clone();
        let count = self.finals.clone();
        move |outcome| {
            *count.borrow_mut() += 1;
            *slot.borrow_mut() = Some(outcome);
        }
    }

    pub fn drain(&mut self) {
        self.host.drain(&mut self.events);
    }

    pub fn outcome(&self) -> RequestOutcome {
        self.outcome.borrow().clone().expect("run did not complete")
    }

    pub fn final_count(&self) -> usize {
        *self.finals.borrow()
    }
}

pub fn caps(ids: &[&str]) -> Vec<Capability> {
    ids.iter().map(|id| Capability::from(*id)).collect()
}

/// Counter shared with a callback
pub fn counter() -> Rc<RefCell<Vec<(Vec<Capability>, bool)>>> {
    Rc::new(RefCell::new(Vec::new()))
}
