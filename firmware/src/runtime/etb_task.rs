use embassy_time::{Duration, Ticker};

use crate::peers::BenchEtb;

const STEP: Duration = Duration::from_millis(1);

/// Publishes a bench ETB into the peer mailbox until a real ETB driver owns it.
#[embassy_executor::task]
pub async fn run() -> ! {
    let mut etb = BenchEtb::new();
    let mut ticker = Ticker::every(STEP);
    #[allow(clippy::cast_precision_loss)]
    let step_ms = STEP.as_millis() as f32;

    loop {
        ticker.next().await;
        etb.step(step_ms);
    }
}
