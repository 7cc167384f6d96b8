use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::adc::{Adc, AdcChannel};
use embassy_stm32::gpio::Flex;
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
use embassy_sync::signal::Signal;
use servo_core::config::ServoConfig;
use servo_core::controller::ServoController;
use static_cell::StaticCell;

use crate::hw::{BoardLines, board_config};
use crate::peers::AtomicEnginePeers;
use crate::time::FirmwareInstant;

mod etb_task;
mod servo_task;
mod status_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) type BoardController =
    ServoController<FirmwareInstant, BoardLines<'static>, AtomicEnginePeers>;

/// Configuration pushed by the calibration layer; applied on the servo task.
pub(super) static CONFIG_UPDATES: Signal<ThreadModeRawMutex, ServoConfig> = Signal::new();

static CONTROLLER: StaticCell<BoardController> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA8,
        PA9,
        PA10,
        PA15,
        PB0,
        PB3,
        PB4,
        PB5,
        PB6,
        PB7,
        ADC1,
        ..
    } = hal::init(config);

    let lines = [
        Flex::new(PB3),
        Flex::new(PB4),
        Flex::new(PB5),
        Flex::new(PA8),
        Flex::new(PA9),
        Flex::new(PA10),
        Flex::new(PA15),
        Flex::new(PB6),
        Flex::new(PB7),
        Flex::new(PB0),
    ];
    let analog = [PA0.degrade_adc(), PA1.degrade_adc()];
    let board = BoardLines::new(lines, Adc::new(ADC1), analog);

    let controller = CONTROLLER.init(ServoController::new(board, AtomicEnginePeers));
    controller.on_configuration_change(Some(board_config()));

    spawner
        .spawn(etb_task::run())
        .expect("failed to spawn ETB task");
    spawner
        .spawn(servo_task::run(controller))
        .expect("failed to spawn servo task");
    spawner
        .spawn(status_task::run())
        .expect("failed to spawn status task");

    core::future::pending::<()>().await;
}
