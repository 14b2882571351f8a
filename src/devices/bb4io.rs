//! Baseboard-4 board I/O
//!
//! The board pushes a button-state packet whenever a button changes;
//! subscribers on `buttons` get each state as two hex digits. Reading
//! `buttons` goes to the hardware (two-phase, resumed on the reply);
//! `leds` is an ordinary write-through register.

use crate::core::driver::{Driver, Services, ACK_TIMEOUT_MS, ERR_MISSING_ACK};
use crate::core::slot::{FLAG_BROADCAST, FLAG_READ, FLAG_WRITE};
use crate::error::Result;
use crate::link::packet::Packet;
use crate::reactor::timer::TimerId;

const RSC_BUTTONS: usize = 0;
const RSC_LEDS: usize = 1;
const REG_BUTTONS: u8 = 0;
const REG_LEDS: u8 = 1;
const TOKEN_WATCHDOG: u32 = 1;

const HELP: &str = "\
bb4io: Baseboard-4 buttons and LEDs
  buttons (read/broadcast): button state as two hex digits
  leds (read/write): LED state as two hex digits
";

struct Pending {
    session: Option<usize>,
    watchdog: TimerId,
}

pub struct Bb4io {
    buttons: u8,
    leds: u8,
    pending: Option<Pending>,
}

impl Bb4io {
    pub fn new() -> Self {
        Self {
            buttons: 0,
            leds: 0,
            pending: None,
        }
    }

    fn cancel_watchdog(&mut self, ctx: &mut Services<'_>) {
        if let Some(pending) = self.pending.take() {
            ctx.del_timer(pending.watchdog);
        }
    }
}

impl Default for Bb4io {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for Bb4io {
    fn initialize(&mut self, ctx: &mut Services<'_>) -> Result<()> {
        ctx.set_identity("bb4io", "Baseboard-4 buttons and LEDs", HELP);
        ctx.add_resource("buttons", FLAG_READ | FLAG_BROADCAST)?;
        ctx.add_resource("leds", FLAG_READ | FLAG_WRITE)?;
        ctx.bind_core()?;
        Ok(())
    }

    fn on_get(&mut self, ctx: &mut Services<'_>, rsc: usize) -> Result<String> {
        match rsc {
            RSC_BUTTONS => {
                // two-phase read: the reply routes back through the lock
                ctx.send_packet(&Packet::read_request(REG_BUTTONS, 1))?;
                ctx.set_ui_lock(RSC_BUTTONS, ctx.session());
                Ok(String::new())
            }
            RSC_LEDS => Ok(format!("{:02x}\n", self.leds)),
            _ => Ok("get not supported\n".to_string()),
        }
    }

    fn on_set(&mut self, ctx: &mut Services<'_>, rsc: usize, args: &str) -> Result<String> {
        debug_assert_eq!(rsc, RSC_LEDS);
        let arg = args.trim();
        let Ok(val) = u8::from_str_radix(arg, 16) else {
            return Ok(format!("invalid leds '{}', expected 00-ff\n", arg));
        };

        ctx.send_packet(&Packet::write(REG_LEDS, &[val]))?;
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
        if pkt.data.is_empty() {
            return;
        }

        if pkt.is_auto_send() {
            self.buttons = pkt.data[0];
            // skip the formatting work entirely with nobody listening
            if ctx.has_subscribers(RSC_BUTTONS) {
                let text = format!("{:02x}\n", self.buttons);
                ctx.broadcast(RSC_BUTTONS, text.as_bytes());
            }
        } else if pkt.is_read_response() {
            self.buttons = pkt.data[0];
            if let Some(conn) = ctx.ui_lock(RSC_BUTTONS) {
                ctx.set_ui_lock(RSC_BUTTONS, None);
                ctx.send_ui(conn, &format!("{:02x}\n", self.buttons));
                ctx.prompt(conn);
            }
        }
    }

    fn on_timer(&mut self, ctx: &mut Services<'_>, token: u32) {
        if token != TOKEN_WATCHDOG {
            return;
        }
        if let Some(pending) = self.pending.take() {
            log::warn!("bb4io slot {}: write not acknowledged", ctx.slot_index());
            if let Some(conn) = pending.session {
                ctx.send_ui(conn, ERR_MISSING_ACK);
                ctx.prompt(conn);
            }
        }
    }
}
