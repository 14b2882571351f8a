//! Control-plane command parsing and execution
//!
//! One command per newline-terminated line:
//!
//! ```text
//! <prefix>set  <slot|name> <resource> <value...>
//! <prefix>get  <slot|name> <resource>
//! <prefix>cat  <slot|name> <resource>
//! <prefix>list [<slot|name>]
//! <prefix>loadso <driver name>
//! ```
//!
//! Every completed command is followed by a single prompt byte so a
//! client can detect command boundaries; `cat` dedicates the session
//! to a broadcast stream and never prompts.

use crate::core::driver::ERR_LINK_WRITE;
use crate::daemon::Daemon;
use crate::error::Error;
use crate::ui::session::PROMPT;

/// A parsed command line
#[derive(Debug, PartialEq, Eq)]
pub enum ParsedCommand<'a> {
    Set {
        selector: &'a str,
        resource: &'a str,
        value: &'a str,
    },
    Get {
        selector: &'a str,
        resource: &'a str,
    },
    Cat {
        selector: &'a str,
        resource: &'a str,
    },
    List {
        selector: Option<&'a str>,
    },
    LoadSo {
        name: &'a str,
    },
}

/// Split off the next whitespace-delimited token
fn next_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

/// Parse one command line against the configured verb prefix
pub fn parse_command<'a>(prefix: &str, line: &'a str) -> Result<ParsedCommand<'a>, String> {
    let line = line.trim();
    let (word, rest) = next_token(line);
    if word.is_empty() {
        return Err("empty command".to_string());
    }

    let verb = word
        .strip_prefix(prefix)
        .ok_or_else(|| format!("unknown command '{}'", word))?;

    match verb {
        "set" => {
            let (selector, rest) = next_token(rest);
            let (resource, value) = next_token(rest);
            if selector.is_empty() || resource.is_empty() {
                return Err(format!("usage: {}set <slot|name> <resource> <value>", prefix));
            }
            Ok(ParsedCommand::Set {
                selector,
                resource,
                value,
            })
        }
        "get" | "cat" => {
            let (selector, rest) = next_token(rest);
            let (resource, trailing) = next_token(rest);
            if selector.is_empty() || resource.is_empty() || !trailing.is_empty() {
                return Err(format!("usage: {}{} <slot|name> <resource>", prefix, verb));
            }
            if verb == "get" {
                Ok(ParsedCommand::Get { selector, resource })
            } else {
                Ok(ParsedCommand::Cat { selector, resource })
            }
        }
        "list" => {
            let (selector, trailing) = next_token(rest);
            if !trailing.is_empty() {
                return Err(format!("usage: {}list [<slot|name>]", prefix));
            }
            Ok(ParsedCommand::List {
                selector: (!selector.is_empty()).then_some(selector),
            })
        }
        "loadso" => {
            let (name, trailing) = next_token(rest);
            if name.is_empty() || !trailing.is_empty() {
                return Err(format!("usage: {}loadso <driver name>", prefix));
            }
            Ok(ParsedCommand::LoadSo { name })
        }
        _ => Err(format!("unknown command '{}'", word)),
    }
}

/// Execute one command line on behalf of a session
pub fn process_line(daemon: &mut Daemon, conn: usize, line: &str) {
    if line.trim().is_empty() {
        daemon.write_session(conn, &[PROMPT]);
        return;
    }

    let prefix = daemon.config.control.prefix.clone();
    let parsed = match parse_command(&prefix, line) {
        Ok(parsed) => parsed,
        Err(msg) => {
            reply_error(daemon, conn, &msg);
            return;
        }
    };

    match parsed {
        ParsedCommand::Set {
            selector,
            resource,
            value,
        } => run_set(daemon, conn, selector, resource, value),
        ParsedCommand::Get { selector, resource } => run_get(daemon, conn, selector, resource),
        ParsedCommand::Cat { selector, resource } => run_cat(daemon, conn, selector, resource),
        ParsedCommand::List { selector } => run_list(daemon, conn, selector),
        ParsedCommand::LoadSo { name } => run_loadso(daemon, conn, name),
    }
}

fn reply_error(daemon: &mut Daemon, conn: usize, msg: &str) {
    daemon.write_session(conn, format!("ERROR : {}\n", msg).as_bytes());
    daemon.write_session(conn, &[PROMPT]);
}

fn resolve(
    daemon: &mut Daemon,
    conn: usize,
    selector: &str,
    resource: &str,
) -> Option<(usize, usize)> {
    let Some(slot) = daemon.find_slot(selector) else {
        reply_error(daemon, conn, &format!("no such slot or driver '{}'", selector));
        return None;
    };
    let Some(rsc) = daemon.slots[slot].find_resource(resource) else {
        reply_error(daemon, conn, &format!("no such resource '{}'", resource));
        return None;
    };
    Some((slot, rsc))
}

fn run_set(daemon: &mut Daemon, conn: usize, selector: &str, resource: &str, value: &str) {
    let Some((slot, rsc)) = resolve(daemon, conn, selector, resource) else {
        return;
    };
    if !daemon.slots[slot].resources[rsc].writable() {
        reply_error(daemon, conn, &format!("resource '{}' is not writable", resource));
        return;
    }

    let value = value.to_string();
    let result = daemon.with_driver(slot, Some(conn), |driver, ctx| {
        driver.on_set(ctx, rsc, &value)
    });
    finish_command(daemon, conn, slot, rsc, result, false);
}

fn run_get(daemon: &mut Daemon, conn: usize, selector: &str, resource: &str) {
    let Some((slot, rsc)) = resolve(daemon, conn, selector, resource) else {
        return;
    };
    if !daemon.slots[slot].resources[rsc].readable() {
        reply_error(daemon, conn, &format!("resource '{}' is not readable", resource));
        return;
    }

    let result = daemon.with_driver(slot, Some(conn), |driver, ctx| driver.on_get(ctx, rsc));
    finish_command(daemon, conn, slot, rsc, result, true);
}

/// Write the driver's reply and the prompt
///
/// A `get` that answered with no text and parked this connection in the
/// resource's UI lock is still pending a hardware reply; the driver
/// emits the text and the prompt itself when the packet arrives.
fn finish_command(
    daemon: &mut Daemon,
    conn: usize,
    slot: usize,
    rsc: usize,
    result: Option<crate::error::Result<String>>,
    is_get: bool,
) {
    match result {
        Some(Ok(text)) => {
            let pending = is_get
                && text.is_empty()
                && daemon.slots[slot].resources[rsc].ui_lock == Some(conn);
            if !text.is_empty() {
                daemon.write_session(conn, text.as_bytes());
            }
            if !pending {
                daemon.write_session(conn, &[PROMPT]);
            }
        }
        Some(Err(Error::LinkBusy)) => {
            daemon.write_session(conn, ERR_LINK_WRITE.as_bytes());
            daemon.write_session(conn, &[PROMPT]);
        }
        Some(Err(e)) => reply_error(daemon, conn, &e.to_string()),
        // the slot emptied between resolution and dispatch
        None => reply_error(daemon, conn, "driver not available"),
    }
}

fn run_cat(daemon: &mut Daemon, conn: usize, selector: &str, resource: &str) {
    let Some((slot, rsc)) = resolve(daemon, conn, selector, resource) else {
        return;
    };
    if !daemon.slots[slot].resources[rsc].broadcasts() {
        reply_error(daemon, conn, &format!("resource '{}' does not broadcast", resource));
        return;
    }

    let key = crate::core::slot::broadcast_key(slot, rsc);
    if let Some(session) = daemon.sessions.get_mut(conn) {
        session.bcast_key = key;
    }
    let entry = &mut daemon.slots[slot].resources[rsc];
    if entry.bcast_key == 0 {
        entry.bcast_key = key;
    }
    // no prompt: the stream runs until the client disconnects
}

fn run_list(daemon: &mut Daemon, conn: usize, selector: Option<&str>) {
    match selector {
        None => {
            let mut out = String::new();
            for slot in daemon.slots.iter().filter(|s| s.occupied) {
                out.push_str(&format!("{:2}  {:<12} {}\n", slot.index, slot.name, slot.desc));
            }
            daemon.write_session(conn, out.as_bytes());
            daemon.write_session(conn, &[PROMPT]);
        }
        Some(selector) => {
            let Some(slot) = daemon.find_slot(selector) else {
                reply_error(daemon, conn, &format!("no such slot or driver '{}'", selector));
                return;
            };
            let help = format!("{}\n", daemon.slots[slot].help.trim_end());
            daemon.write_session(conn, help.as_bytes());
            daemon.write_session(conn, &[PROMPT]);
        }
    }
}

fn run_loadso(daemon: &mut Daemon, conn: usize, name: &str) {
    match daemon.load_driver(None, name, None) {
        Ok(slot) => {
            let msg = format!("loaded '{}' into slot {}\n", name, slot);
            daemon.write_session(conn, msg.as_bytes());
            daemon.write_session(conn, &[PROMPT]);
        }
        Err(e) => reply_error(daemon, conn, &e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_set_keeps_value_tail() {
        let cmd = parse_command("pc", "pcset out4 outval f").unwrap();
        assert_eq!(
            cmd,
            ParsedCommand::Set {
                selector: "out4",
                resource: "outval",
                value: "f"
            }
        );

        // the value is the remainder of the line, spaces included
        let cmd = parse_command("pc", "pcset lcd6 text hello world").unwrap();
        assert_eq!(
            cmd,
            ParsedCommand::Set {
                selector: "lcd6",
                resource: "text",
                value: "hello world"
            }
        );
    }

    #[test]
    fn test_parse_get_and_cat() {
        assert_eq!(
            parse_command("pc", "pcget 3 switches").unwrap(),
            ParsedCommand::Get {
                selector: "3",
                resource: "switches"
            }
        );
        assert_eq!(
            parse_command("pc", "pccat bb4io buttons").unwrap(),
            ParsedCommand::Cat {
                selector: "bb4io",
                resource: "buttons"
            }
        );
        assert!(parse_command("pc", "pcget bb4io").is_err());
        assert!(parse_command("pc", "pcget bb4io buttons extra").is_err());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(
            parse_command("pc", "pclist").unwrap(),
            ParsedCommand::List { selector: None }
        );
        assert_eq!(
            parse_command("pc", "pclist out4").unwrap(),
            ParsedCommand::List {
                selector: Some("out4")
            }
        );
    }

    #[test]
    fn test_parse_loadso() {
        assert_eq!(
            parse_command("pc", "pcloadso out4").unwrap(),
            ParsedCommand::LoadSo { name: "out4" }
        );
        assert!(parse_command("pc", "pcloadso").is_err());
    }

    #[test]
    fn test_prefix_is_required() {
        assert!(parse_command("pc", "set out4 outval f").is_err());
        // empty prefix accepts the bare verbs
        assert!(parse_command("", "set out4 outval f").is_ok());
    }

    #[test]
    fn test_unknown_verb() {
        assert!(parse_command("pc", "pcfrobnicate x y").is_err());
        assert!(parse_command("pc", "pcsetx out4 outval f").is_err());
    }

    #[test]
    fn test_whitespace_tolerance() {
        let cmd = parse_command("pc", "  pcget   out4   outval  ").unwrap();
        assert_eq!(
            cmd,
            ParsedCommand::Get {
                selector: "out4",
                resource: "outval"
            }
        );
    }
}
