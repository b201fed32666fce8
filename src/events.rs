use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::types::{Currency, InvestmentId};

/// notification kinds handed to the notification service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    InvestmentActivated,
    CycleSettled,
    TermCompleted,
    InvestmentCancelled,
}

/// all events the engine asks to be notified
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    InvestmentActivated {
        investment_id: InvestmentId,
        principal: Money,
        currency: Currency,
        term_end: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    CycleSettled {
        investment_id: InvestmentId,
        boundary: DateTime<Utc>,
        amount: Money,
        lifetime_accumulated: Money,
        currency: Currency,
        timestamp: DateTime<Utc>,
    },
    TermCompleted {
        investment_id: InvestmentId,
        principal: Money,
        lifetime_accumulated: Money,
        payout: Money,
        currency: Currency,
        timestamp: DateTime<Utc>,
    },
    InvestmentCancelled {
        investment_id: InvestmentId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::InvestmentActivated { .. } => EventKind::InvestmentActivated,
            Event::CycleSettled { .. } => EventKind::CycleSettled,
            Event::TermCompleted { .. } => EventKind::TermCompleted,
            Event::InvestmentCancelled { .. } => EventKind::InvestmentCancelled,
        }
    }

    pub fn investment_id(&self) -> InvestmentId {
        match self {
            Event::InvestmentActivated { investment_id, .. }
            | Event::CycleSettled { investment_id, .. }
            | Event::TermCompleted { investment_id, .. }
            | Event::InvestmentCancelled { investment_id, .. } => *investment_id,
        }
    }
}

/// event store for collecting events
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// events of one kind for one investment
    pub fn count(&self, investment_id: InvestmentId, kind: EventKind) -> usize {
        self.events
            .iter()
            .filter(|e| e.investment_id() == investment_id && e.kind() == kind)
            .count()
    }
}
