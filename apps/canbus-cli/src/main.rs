use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::thread;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::info;

use can_bus::{CanBus, CanFrame, CanId, MockTransport, RawCanSocket, TimestampedFrame};

#[derive(Parser, Debug)]
#[command(
    name = "canbus",
    version,
    about = "CAN bus utility: dump received traffic, send single frames",
    disable_help_subcommand = true
)]
struct Cli {
    /// Use the in-process mock backend (portable, loops sends back)
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    mock: bool,

    /// CAN interface name
    #[arg(long, default_value = "can0", global = true)]
    interface: String,

    /// Give up if the interface is not available within this many seconds
    /// (default: wait forever)
    #[arg(long, global = true)]
    connect_timeout_s: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print frames as they arrive
    Dump {
        /// Drain period in milliseconds
        #[arg(long, default_value_t = 100u64)]
        period_ms: u64,
        /// Emit frames as JSON lines
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        /// Stop after this many frames (0 = run until interrupted)
        #[arg(long, default_value_t = 0u64)]
        count: u64,
    },
    /// Send a single frame
    Send {
        /// Identifier in hex (e.g. 123 or 18DAF110)
        id: String,
        /// Payload as hex pairs (e.g. DEADBEEF), at most 8 bytes
        #[arg(default_value = "")]
        data: String,
        /// Force an extended (29-bit) identifier
        #[arg(long, action = ArgAction::SetTrue)]
        extended: bool,
        /// Send a remote transmission request with the given DLC
        #[arg(long)]
        rtr: Option<u8>,
    },
}

enum Bus {
    Raw(CanBus<RawCanSocket>),
    Mock(CanBus<MockTransport>),
}

impl Bus {
    fn open(cli: &Cli) -> Result<Self> {
        if cli.mock {
            info!("using mock backend");
            return Ok(Bus::Mock(CanBus::with_transport(MockTransport::new())?));
        }
        let bus = match cli.connect_timeout_s {
            Some(secs) => {
                CanBus::connect_deadline(&cli.interface, Duration::from_secs(secs))
                    .with_context(|| format!("interface {} not available", cli.interface))?
            }
            None => CanBus::connect(&cli.interface)?,
        };
        Ok(Bus::Raw(bus))
    }

    fn write(&self, frame: &CanFrame) -> can_bus::Result<()> {
        match self {
            Bus::Raw(bus) => bus.write(frame),
            Bus::Mock(bus) => bus.write(frame),
        }
    }

    fn drain(&self) -> Vec<TimestampedFrame> {
        match self {
            Bus::Raw(bus) => bus.drain(),
            Bus::Mock(bus) => bus.drain(),
        }
    }
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let bus = Bus::open(&cli)?;

    match cli.command {
        Commands::Dump {
            period_ms,
            json,
            count,
        } => dump(&bus, &cli.interface, period_ms, json, count),
        Commands::Send {
            id,
            data,
            extended,
            rtr,
        } => {
            let frame = build_frame(&id, &data, extended, rtr)?;
            bus.write(&frame)?;
            info!(id = %frame.id, len = frame.len, "frame sent");
            if cli.mock {
                // The mock loops sends back; show the round trip.
                thread::sleep(Duration::from_millis(50));
                for stamped in bus.drain() {
                    print_frame("mock", &stamped, false)?;
                }
            }
            Ok(())
        }
    }
}

fn dump(bus: &Bus, interface: &str, period_ms: u64, json: bool, count: u64) -> Result<()> {
    let label = if matches!(bus, Bus::Mock(_)) {
        "mock"
    } else {
        interface
    };
    let mut printed = 0u64;
    loop {
        for stamped in bus.drain() {
            print_frame(label, &stamped, json)?;
            printed += 1;
            if count != 0 && printed >= count {
                return Ok(());
            }
        }
        thread::sleep(Duration::from_millis(period_ms));
    }
}

fn print_frame(label: &str, stamped: &TimestampedFrame, json: bool) -> Result<()> {
    let age = time::Duration::try_from(stamped.stamp.elapsed())?;
    let wall = (OffsetDateTime::now_utc() - age).format(&Rfc3339)?;
    let frame = &stamped.frame;
    if json {
        println!(
            "{}",
            serde_json::json!({
                "time": wall,
                "interface": label,
                "frame": frame,
            })
        );
    } else {
        let data = frame
            .payload()
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ");
        let marker = if frame.err {
            " ERR"
        } else if frame.rtr {
            " RTR"
        } else {
            ""
        };
        println!(
            "{wall}  {label}  {id}  [{len}]  {data}{marker}",
            id = frame.id,
            len = frame.len
        );
    }
    Ok(())
}

fn build_frame(id: &str, data: &str, extended: bool, rtr: Option<u8>) -> Result<CanFrame> {
    let raw = u32::from_str_radix(id, 16).with_context(|| format!("invalid identifier {id:?}"))?;
    let id = if extended || raw > 0x7FF {
        CanId::extended(raw).ok_or_else(|| anyhow!("identifier {raw:#X} out of 29-bit range"))?
    } else {
        CanId::standard(raw as u16).ok_or_else(|| anyhow!("identifier out of 11-bit range"))?
    };

    if let Some(dlc) = rtr {
        return CanFrame::new_remote(id, dlc).ok_or_else(|| anyhow!("RTR DLC {dlc} exceeds 8"));
    }

    let payload = parse_hex_payload(data)?;
    CanFrame::new(id, &payload).ok_or_else(|| anyhow!("payload exceeds 8 bytes"))
}

fn parse_hex_payload(data: &str) -> Result<Vec<u8>> {
    if data.len() % 2 != 0 {
        bail!("payload must be whole hex pairs");
    }
    if data.len() > 16 {
        bail!("payload exceeds 8 bytes");
    }
    data.as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair)?;
            u8::from_str_radix(pair, 16).with_context(|| format!("invalid hex byte {pair:?}"))
        })
        .collect()
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_standard_frame_from_hex() {
        let frame = build_frame("123", "0102030405060708", false, None).expect("valid frame");
        assert!(!frame.id.is_extended());
        assert_eq!(frame.id.raw(), 0x123);
        assert_eq!(frame.payload(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn wide_identifier_becomes_extended() {
        let frame = build_frame("18DAF110", "", false, None).expect("valid frame");
        assert!(frame.id.is_extended());
    }

    #[test]
    fn rejects_bad_payloads() {
        assert!(build_frame("123", "ABC", false, None).is_err());
        assert!(build_frame("123", "00112233445566778899", false, None).is_err());
        assert!(build_frame("xyz", "", false, None).is_err());
    }

    #[test]
    fn rtr_frame_carries_dlc_only() {
        let frame = build_frame("42", "", false, Some(3)).expect("valid frame");
        assert!(frame.rtr);
        assert_eq!(frame.len, 3);
    }
}
