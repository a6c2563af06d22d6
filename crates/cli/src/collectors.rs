use std::sync::Arc;

use anyhow::{anyhow, Result};
use tally_plugin_protocol::Plugin;

/// A collector compiled into the `tally` binary.
pub struct BundledCollector {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    factory: fn() -> Arc<dyn Plugin>,
}

impl BundledCollector {
    pub fn plugin(&self) -> Arc<dyn Plugin> {
        (self.factory)()
    }
}

pub const COLLECTORS: &[BundledCollector] = &[
    BundledCollector {
        name: tally_example_collector::NAME,
        version: tally_example_collector::VERSION,
        description: "Request/response collector emitting five example metrics",
        factory: example,
    },
    BundledCollector {
        name: tally_streaming_collector::NAME,
        version: tally_streaming_collector::VERSION,
        description: "Streaming collector emitting a growing counter",
        factory: streaming_example,
    },
];

fn example() -> Arc<dyn Plugin> {
    Arc::new(tally_example_collector::ExampleCollector)
}

fn streaming_example() -> Arc<dyn Plugin> {
    Arc::new(tally_streaming_collector::StreamingExample)
}

pub fn find(name: &str) -> Result<&'static BundledCollector> {
    COLLECTORS.iter().find(|c| c.name == name).ok_or_else(|| {
        let known: Vec<&str> = COLLECTORS.iter().map(|c| c.name).collect();
        anyhow!(
            "Unknown collector '{}' (available: {})",
            name,
            known.join(", ")
        )
    })
}
