use std::sync::Arc;

use tally_streaming_collector::{StreamingExample, NAME, VERSION};

fn main() -> anyhow::Result<()> {
    tally_core::start_collector(Arc::new(StreamingExample), NAME, VERSION)?;
    Ok(())
}
