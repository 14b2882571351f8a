//! Basys-3 board driver
//!
//! The board state is three registers: the push-buttons byte and the
//! sixteen slide switches as two bytes. `switches` reads all three in
//! one transfer and also streams changes to subscribers; `leds` drives
//! the sixteen LEDs above the switches.

use crate::core::driver::{Driver, Services, ACK_TIMEOUT_MS, ERR_MISSING_ACK};
use crate::core::slot::{FLAG_BROADCAST, FLAG_READ, FLAG_WRITE};
use crate::error::Result;
use crate::link::packet::Packet;
use crate::reactor::timer::TimerId;

const RSC_SWITCHES: usize = 0;
const RSC_LEDS: usize = 1;
const REG_STATE: u8 = 0;
const REG_LEDS: u8 = 3;
const STATE_LEN: usize = 3;
const TOKEN_WATCHDOG: u32 = 1;

const HELP: &str = "\
basys3: Basys-3 board buttons, switches, and LEDs
  switches (read/broadcast): buttons byte and switch word as hex
  leds (read/write): LED word as up to four hex digits
";

struct Pending {
    session: Option<usize>,
    watchdog: TimerId,
}

pub struct Basys3 {
    /// Last seen buttons byte and switch bytes, high then low
    state: [u8; STATE_LEN],
    leds: u16,
    pending: Option<Pending>,
}

impl Basys3 {
    pub fn new() -> Self {
        Self {
            state: [0; STATE_LEN],
            leds: 0,
            pending: None,
        }
    }

    fn format_state(&self) -> String {
        format!(
            "{:02x} {:02x}{:02x}\n",
            self.state[0], self.state[1], self.state[2]
        )
    }

    fn cancel_watchdog(&mut self, ctx: &mut Services<'_>) {
        if let Some(pending) = self.pending.take() {
            ctx.del_timer(pending.watchdog);
        }
    }
}

impl Default for Basys3 {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for Basys3 {
    fn initialize(&mut self, ctx: &mut Services<'_>) -> Result<()> {
        ctx.set_identity("basys3", "Basys-3 board I/O", HELP);
        ctx.add_resource("switches", FLAG_READ | FLAG_BROADCAST)?;
        ctx.add_resource("leds", FLAG_READ | FLAG_WRITE)?;
        ctx.bind_core()?;
        Ok(())
    }

    fn on_get(&mut self, ctx: &mut Services<'_>, rsc: usize) -> Result<String> {
        match rsc {
            RSC_SWITCHES => {
                ctx.send_packet(&Packet::read_request(REG_STATE, STATE_LEN as u8))?;
                ctx.set_ui_lock(RSC_SWITCHES, ctx.session());
                Ok(String::new())
            }
            RSC_LEDS => Ok(format!("{:04x}\n", self.leds)),
            _ => Ok("get not supported\n".to_string()),
        }
    }

    fn on_set(&mut self, ctx: &mut Services<'_>, rsc: usize, args: &str) -> Result<String> {
        debug_assert_eq!(rsc, RSC_LEDS);
        let arg = args.trim();
        let Ok(val) = u16::from_str_radix(arg, 16) else {
            return Ok(format!("invalid leds '{}', expected 0000-ffff\n", arg));
        };

        ctx.send_packet(&Packet::write(REG_LEDS, &val.to_be_bytes()))?;
        self.leds = val;

        self.cancel_watchdog(ctx);
        let watchdog = ctx.add_oneshot(ACK_TIMEOUT_MS, TOKEN_WATCHDOG)?;
        self.pending = Some(Pending {
            session: ctx.session(),
            watchdog,
        });
        Ok(String::new())
    }

    fn on_packet(&mut self, ctx: &mut Services<'_>, pkt: &Packet) {
        if pkt.is_write_ack() {
            self.cancel_watchdog(ctx);
            return;
        }
        if pkt.data.len() < STATE_LEN {
            return;
        }

        if pkt.is_auto_send() {
            self.state.copy_from_slice(&pkt.data[..STATE_LEN]);
            if ctx.has_subscribers(RSC_SWITCHES) {
                let text = self.format_state();
                ctx.broadcast(RSC_SWITCHES, text.as_bytes());
            }
        } else if pkt.is_read_response() {
            self.state.copy_from_slice(&pkt.data[..STATE_LEN]);
            if let Some(conn) = ctx.ui_lock(RSC_SWITCHES) {
                ctx.set_ui_lock(RSC_SWITCHES, None);
                let text = self.format_state();
                ctx.send_ui(conn, &text);
                ctx.prompt(conn);
            }
        }
    }

    fn on_timer(&mut self, ctx: &mut Services<'_>, token: u32) {
        if token != TOKEN_WATCHDOG {
            return;
        }
        if let Some(pending) = self.pending.take() {
            log::warn!("basys3 slot {}: write not acknowledged", ctx.slot_index());
            if let Some(conn) = pending.session {
                ctx.send_ui(conn, ERR_MISSING_ACK);
                ctx.prompt(conn);
            }
        }
    }
}
