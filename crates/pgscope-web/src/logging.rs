//! Tracing layer that drives the `pgscope_logging_{info,warn,error}`
//! meta-metrics from every log event in the process, installed alongside the
//! `fmt` layer in `main` so nothing needs to call `record_*` by hand at each
//! log site.

use std::sync::Arc;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use pgscope_core::meta::LoggingCounters;

pub struct CountingLayer {
    pub counters: Arc<LoggingCounters>,
}

impl<S: Subscriber> Layer<S> for CountingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        match *event.metadata().level() {
            Level::ERROR => self.counters.record_error(),
            Level::WARN => self.counters.record_warn(),
            Level::INFO => self.counters.record_info(),
            Level::DEBUG | Level::TRACE => {}
        }
    }
}
