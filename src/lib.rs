pub mod chassis;
pub mod chassis_status_monitor;
pub mod config;
pub mod error;
pub mod gpio;
pub mod i2c;
pub mod rail;
pub mod regulators;
pub mod sequencer;
pub mod services;
pub mod system;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::services::Services;
use crate::system::System;

/// How often `run_monitor_loop` ticks `System::monitor` (spec.md §5: a
/// periodic poll, not event-driven).
pub const MONITOR_INTERVAL: Duration = Duration::from_millis(500);

pub fn configure_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| {
                info!("RUST_LOG not set, using default log level 'info'");
                EnvFilter::new("info") // Default log level if not set
            }),
        )
        .with_thread_ids(true)
        .with_thread_names(false)
        .with_writer(std::io::stdout) // log to stdout for compat with containerized environments
        .init();
}

/// Ticks `System::monitor` on a fixed interval until `cancel` fires.
/// Grounded in the teacher's `services/power_monitor.rs` /
/// `services/weight_monitor.rs` poll-loop shape (a `tokio::spawn`'d
/// `loop { sleep; sample; }`), generalized from a sensor-averaging loop
/// to the pgood state-machine tick (spec.md §5: `System`/`Chassis`
/// state is owned by this loop's task, not shared behind a lock, except
/// for the `Arc<Mutex<_>>` wrapper needed so a caller elsewhere can also
/// reach it to issue `set_power_state`).
pub async fn run_monitor_loop(
    system: Arc<Mutex<System>>,
    services: Arc<dyn Services>,
    cancel: CancellationToken,
) {
    info!("starting chassis power-good monitor loop");
    let mut interval = tokio::time::interval(MONITOR_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("monitor loop received shutdown signal, stopping");
                return;
            }
            _ = interval.tick() => {
                let mut system = system.lock().await;
                system.monitor(services.as_ref()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chassis::{Chassis, PowerState};
    use crate::chassis_status_monitor::ChassisStatusMonitorOptions;
    use crate::sequencer::PowerSequencerDevice;
    use crate::services::mock::MockServices;

    #[tokio::test(start_paused = true)]
    async fn monitor_loop_ticks_until_cancelled() {
        let mock = MockServices::new();
        let pgood = mock.gpio_line("pseq0-pgood");
        pgood.set(1);
        let device = PowerSequencerDevice::gpios_only(
            "pseq0",
            "i2c-1",
            0x40,
            "pseq0-control",
            "pseq0-pgood",
            vec![],
        );
        let mut chassis = Chassis::new(1, "/system/chassis0", vec![device]).unwrap();
        chassis.initialize_monitoring(ChassisStatusMonitorOptions {
            is_present_monitored: true,
            is_available_monitored: true,
            is_enabled_monitored: true,
            is_input_power_status_monitored: true,
            ..Default::default()
        });
        {
            let m = chassis.monitor_mut().unwrap();
            m.handle_present_changed(true);
            m.handle_available_changed(true);
            m.handle_enabled_changed(true);
            m.handle_input_power_status_changed(crate::services::InputPowerStatus::Good);
        }
        chassis.set_power_state(PowerState::On, &mock).await.unwrap();

        let system = System::new(vec![chassis]);
        let system = Arc::new(Mutex::new(system));
        let services: Arc<dyn Services> = Arc::new(mock);
        let cancel = CancellationToken::new();

        let loop_handle = tokio::spawn(run_monitor_loop(
            system.clone(),
            services.clone(),
            cancel.clone(),
        ));

        tokio::time::sleep(MONITOR_INTERVAL * 2).await;
        cancel.cancel();
        loop_handle.await.unwrap();

        let system = system.lock().await;
        assert_eq!(system.observed_power_good(), Some(true));
    }
}
