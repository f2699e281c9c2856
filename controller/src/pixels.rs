use core::time::Duration;

use anyhow::Context;
use esp_idf_hal::{
    gpio::OutputPin,
    peripheral::Peripheral,
    rmt::{config::TransmitConfig, PinState, Pulse, RmtChannel, TxRmtDriver, VariableLengthSignal},
};
use log::{info, warn};

use ledstrip_common::{LightingSink, LightingState};

// WS2812 bit timings.
const T0H_NS: u64 = 350;
const T0L_NS: u64 = 800;
const T1H_NS: u64 = 700;
const T1L_NS: u64 = 600;

enum StripBackend {
    Rmt {
        tx: TxRmtDriver<'static>,
        zero: (Pulse, Pulse),
        one: (Pulse, Pulse),
    },
    Disabled,
}

/// WS2812 strip driven over one RMT channel; every pixel shows the same color.
pub struct PixelStrip {
    backend: StripBackend,
    pixel_count: usize,
    last_written: Option<(u8, u8, u8)>,
    failed_writes: u32,
}

impl PixelStrip {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
        pixel_count: usize,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let config = TransmitConfig::new().clock_divider(1);
        let tx = TxRmtDriver::new(channel, pin, &config).context("failed to init RMT LED driver")?;

        let ticks_hz = tx.counter_clock()?;
        let pulse = |state, ns| Pulse::new_with_duration(ticks_hz, state, &Duration::from_nanos(ns));
        let zero = (pulse(PinState::High, T0H_NS)?, pulse(PinState::Low, T0L_NS)?);
        let one = (pulse(PinState::High, T1H_NS)?, pulse(PinState::Low, T1L_NS)?);

        info!("RMT LED driver ready for {pixel_count} pixels");
        Ok(Self {
            backend: StripBackend::Rmt { tx, zero, one },
            pixel_count,
            last_written: None,
            failed_writes: 0,
        })
    }

    pub fn disabled(pixel_count: usize) -> Self {
        Self {
            backend: StripBackend::Disabled,
            pixel_count,
            last_written: None,
            failed_writes: 0,
        }
    }

    fn write(&mut self, rgb: (u8, u8, u8)) -> anyhow::Result<()> {
        let StripBackend::Rmt { tx, zero, one } = &mut self.backend else {
            return Ok(());
        };

        let (red, green, blue) = rgb;
        let grb = (u32::from(green) << 16) | (u32::from(red) << 8) | u32::from(blue);

        let mut signal = VariableLengthSignal::with_capacity(self.pixel_count * 24 * 2);
        for _ in 0..self.pixel_count {
            for bit in (0..24).rev() {
                let (high, low) = if grb & (1 << bit) != 0 { &*one } else { &*zero };
                signal
                    .push([high, low])
                    .context("failed to encode LED frame")?;
            }
        }

        tx.start_blocking(&signal)
            .context("failed to transmit LED frame over RMT")?;
        Ok(())
    }
}

impl LightingSink for PixelStrip {
    fn apply(&mut self, lighting: &LightingState) {
        let rgb = lighting.scaled_rgb();
        if self.last_written == Some(rgb) {
            return;
        }

        match self.write(rgb) {
            Ok(()) => self.last_written = Some(rgb),
            Err(err) => {
                self.failed_writes = self.failed_writes.saturating_add(1);
                warn!(
                    "LED strip update failed ({} so far): {err:#}",
                    self.failed_writes
                );
            }
        }
    }
}
