use std::sync::Arc;

use tally_example_collector::{ExampleCollector, NAME, VERSION};

fn main() -> anyhow::Result<()> {
    tally_core::start_collector(Arc::new(ExampleCollector), NAME, VERSION)?;
    Ok(())
}
