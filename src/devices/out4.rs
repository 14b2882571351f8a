//! Quad binary output peripheral
//!
//! One resource, `outval`: a single hex digit driving the four output
//! pins. Writes go straight to the peripheral's register and arm the
//! ack watchdog; reads answer from the write-through shadow.

use crate::core::driver::{Driver, Services, ACK_TIMEOUT_MS, ERR_MISSING_ACK};
use crate::core::slot::{FLAG_READ, FLAG_WRITE};
use crate::error::Result;
use crate::link::packet::Packet;
use crate::reactor::timer::TimerId;

const RSC_OUTVAL: usize = 0;
const REG_OUTVAL: u8 = 0;
const TOKEN_WATCHDOG: u32 = 1;

const HELP: &str = "\
out4: four binary outputs
  outval (read/write): hex digit 0-f, one bit per output pin
";

/// An unacknowledged write
struct Pending {
    session: Option<usize>,
    watchdog: TimerId,
}

pub struct Out4 {
    outval: u8,
    pending: Option<Pending>,
}

impl Out4 {
    pub fn new() -> Self {
        Self {
            outval: 0,
            pending: None,
        }
    }

    fn cancel_watchdog(&mut self, ctx: &mut Services<'_>) {
        if let Some(pending) = self.pending.take() {
            ctx.del_timer(pending.watchdog);
        }
    }
}

impl Default for Out4 {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for Out4 {
    fn initialize(&mut self, ctx: &mut Services<'_>) -> Result<()> {
        ctx.set_identity("out4", "quad binary output", HELP);
        ctx.add_resource("outval", FLAG_READ | FLAG_WRITE)?;
        ctx.bind_core()?;
        Ok(())
    }

    fn on_get(&mut self, _ctx: &mut Services<'_>, rsc: usize) -> Result<String> {
        debug_assert_eq!(rsc, RSC_OUTVAL);
        Ok(format!("{:x}\n", self.outval))
    }

    fn on_set(&mut self, ctx: &mut Services<'_>, rsc: usize, args: &str) -> Result<String> {
        debug_assert_eq!(rsc, RSC_OUTVAL);
        let arg = args.trim();
        let Some(val) = u8::from_str_radix(arg, 16).ok().filter(|v| *v <= 0x0F) else {
            return Ok(format!("invalid outval '{}', expected 0-f\n", arg));
        };

        ctx.send_packet(&Packet::write(REG_OUTVAL, &[val]))?;
        self.outval = val;

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
        }
    }

    fn on_timer(&mut self, ctx: &mut Services<'_>, token: u32) {
        if token != TOKEN_WATCHDOG {
            return;
        }
        if let Some(pending) = self.pending.take() {
            log::warn!("out4 slot {}: write not acknowledged", ctx.slot_index());
            if let Some(conn) = pending.session {
                ctx.send_ui(conn, ERR_MISSING_ACK);
                ctx.prompt(conn);
            }
        }
    }
}
