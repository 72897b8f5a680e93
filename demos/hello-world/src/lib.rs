use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    pub value: u64,
}

pub fn counter_event() -> walnats::Event<Counter> {
    walnats::Event::new("counter")
}
