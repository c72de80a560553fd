use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use rand::Rng;
use seq_runtime::{
    ChannelSpec, ElementType, LocalPvSystem, Program, ProgramConfig, ProgramSpec, StateId,
    StateSetContext, StateSetSpec, StateSpec, TypedBuffer,
};
use tokio::time::{interval, sleep};
use tracing::{info, warn};

const LEVEL_PV: &str = "tank:level";
const PUMP_PV: &str = "tank:pump";
const LOW_LEVEL: f64 = 20.0;
const HIGH_LEVEL: f64 = 80.0;

/// A tank that drains at random and fills while its pump runs.
fn tank_program() -> ProgramSpec {
    let mut spec = ProgramSpec::new("tank");
    let level_changed = spec.add_event_flag("level_changed");
    let level = spec.add_channel(
        ChannelSpec::new("level", ElementType::Double, 1)
            .pv(LEVEL_PV)
            .monitor()
            .sync(level_changed),
    );
    let pump = spec.add_channel(
        ChannelSpec::new("pump", ElementType::Int, 1)
            .pv(PUMP_PV)
            .monitor(),
    );

    let switch_pump = move |ctx: &mut StateSetContext, on: i32| -> Result<()> {
        ctx.set(pump, on)?;
        ctx.pv_put(pump)?;
        Ok(())
    };

    spec.add_state_set(
        StateSetSpec::new("fill")
            .state(StateSpec::new("draining", move |ctx| {
                if !ctx.ef_test_and_clear(level_changed) {
                    return None;
                }
                let value = ctx.get::<f64>(level).unwrap_or_default();
                (value < LOW_LEVEL).then_some(StateId(1))
            }))
            .state(
                StateSpec::new("filling", move |ctx| {
                    if !ctx.ef_test_and_clear(level_changed) {
                        return None;
                    }
                    let value = ctx.get::<f64>(level).unwrap_or_default();
                    (value > HIGH_LEVEL).then_some(StateId(0))
                })
                .entry(move |ctx| {
                    info!(level = ctx.get::<f64>(level).unwrap_or_default(), "Pump on");
                    if let Err(e) = switch_pump(ctx, 1) {
                        warn!(error = %e, "Failed to start pump");
                    }
                })
                .exit(move |ctx| {
                    info!(level = ctx.get::<f64>(level).unwrap_or_default(), "Pump off");
                    if let Err(e) = switch_pump(ctx, 0) {
                        warn!(error = %e, "Failed to stop pump");
                    }
                }),
            ),
    );

    spec.add_state_set(StateSetSpec::new("report").state(StateSpec::new(
        "report",
        move |ctx| {
            if !ctx.delay(Duration::from_secs(1)) {
                return None;
            }
            info!(
                level = ctx.get::<f64>(level).unwrap_or_default(),
                pump = ctx.get::<i32>(pump).unwrap_or_default(),
                "Tank status"
            );
            Some(StateId(0))
        },
    )));

    spec.exit(move |ctx| {
        if let Err(e) = switch_pump(ctx, 0) {
            warn!(error = %e, "Failed to stop pump on exit");
        }
    });

    spec
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let seconds: u64 = std::env::var("DEMO_SECONDS")
        .unwrap_or_else(|_| "10".to_string())
        .parse()?;
    let safe_mode = std::env::var("DEMO_SAFE_MODE")
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true);

    let pv = Arc::new(LocalPvSystem::new());
    pv.define(LEVEL_PV, TypedBuffer::scalar(50.0f64));
    pv.define(PUMP_PV, TypedBuffer::scalar(0i32));

    let config = ProgramConfig::builder().safe_mode(safe_mode).build();
    let program = Program::new(tank_program(), config, pv.clone())?;

    info!(seconds, safe_mode, "Starting tank demo");
    let handle = program.spawn()?;

    let simulator = {
        let pv = pv.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(100));
            loop {
                ticker.tick().await;
                let level = pv
                    .value(LEVEL_PV)
                    .and_then(|v| v.get::<f64>(0).ok())
                    .unwrap_or_default();
                let pumping = pv
                    .value(PUMP_PV)
                    .and_then(|v| v.get::<i32>(0).ok())
                    .unwrap_or_default()
                    != 0;

                let drain = rand::rng().random_range(0.5..2.0);
                let inflow = if pumping { 4.0 } else { 0.0 };
                let next = (level - drain + inflow).clamp(0.0, 100.0);

                if let Err(e) = pv.set(LEVEL_PV, TypedBuffer::scalar(next)) {
                    warn!(error = %e, "Failed to update level");
                }
            }
        })
    };

    sleep(Duration::from_secs(seconds)).await;
    simulator.abort();
    program.exit();

    tokio::task::spawn_blocking(move || handle.join())
        .await?
        .map_err(|_| anyhow!("program thread panicked"))??;

    info!("Tank demo finished");
    Ok(())
}
