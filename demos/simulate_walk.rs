//! Walk at three cadences and print the classified steps and day summary

use chrono::{Duration, Utc};
use strider::{BiometricProfile, Gender, TrackerConfig, TrackerContext};

#[tokio::main]
async fn main() {
    let ctx = TrackerContext::in_memory(TrackerConfig::default());
    if let Err(e) = ctx
        .biometrics()
        .save(BiometricProfile::new("Demo", Gender::Female, 168.0, 62.0))
    {
        eprintln!("Error: {e}");
        return;
    }

    let mut classifier = ctx.classifier();
    let mut at = Utc::now();

    // 20 pulses each at 120, 150 and 200 steps/min
    for period_ms in [500, 400, 300] {
        for _ in 0..20 {
            at += Duration::milliseconds(period_ms);
            let step = classifier.on_pulse_at(at).await;
            println!(
                "{} {:>6} met={:.2} speed={:.2} m/s",
                step.instant.format("%H:%M:%S%.3f"),
                step.walk_speed.as_str(),
                step.met,
                step.speed
            );
        }
    }
    classifier.shutdown();

    match ctx.day_summary(at.date_naive(), &Utc) {
        Ok(summary) => println!(
            "\n{} steps, {}, {}",
            summary.steps,
            summary.distance_label(),
            summary.calories_label()
        ),
        Err(e) => eprintln!("Error: {e}"),
    }
}
