use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::time::Duration;

use serial_mon::prelude::*;

/// Serial port monitor with text, hex and byte-literal views.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Serial port to connect to at start-up
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Parity: N, E, O, M or S
    #[arg(long)]
    parity: Option<Parity>,

    /// Data bits: 5, 6, 7 or 8
    #[arg(long, value_parser = clap::value_parser!(u8).range(5..=8))]
    data_bits: Option<u8>,

    /// Stop bits: 1, 1.5 or 2
    #[arg(long)]
    stop_bits: Option<StopBits>,

    /// Stored profile to start from
    #[arg(long)]
    profile: Option<String>,

    /// Profile store location
    #[arg(long, default_value = PROFILE_FILE)]
    profiles: PathBuf,

    /// Display mode: text, hex or bytes
    #[arg(short, long, default_value = "text")]
    mode: DisplayMode,

    /// Append CR to every line sent
    #[arg(long)]
    cr: bool,

    /// Append LF to every line sent
    #[arg(long)]
    lf: bool,

    /// Read input lines as hex
    #[arg(long)]
    hex_input: bool,

    /// Prefix received blocks with the local time
    #[arg(short, long)]
    timestamps: bool,

    /// Display flush period in milliseconds
    #[arg(long, default_value_t = 50)]
    flush_ms: u64,

    /// Read timeout in milliseconds
    #[arg(long, default_value_t = 100)]
    read_timeout_ms: u64,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Use an in-memory echo device instead of real ports
    #[arg(long)]
    loopback: bool,
}

impl Args {
    fn settings(&self, store: &ProfileStore) -> ConsoleSettings {
        let mut profile = match &self.profile {
            Some(name) => match store.resolve(name) {
                Ok(profile) => profile,
                Err(e) => {
                    error!("{e}, using built-in settings");
                    ConnectionProfile::default()
                }
            },
            None => ConnectionProfile::default(),
        };
        if let Some(baud) = self.baud {
            profile.baud_rate = baud;
        }
        if let Some(parity) = self.parity {
            profile.parity = parity;
        }
        if let Some(bits) = self.data_bits.and_then(DataBits::from_bits) {
            profile.data_bits = bits;
        }
        if let Some(stop) = self.stop_bits {
            profile.stop_bits = stop;
        }

        let read_timeout = Duration::from_millis(self.read_timeout_ms.max(1));
        ConsoleSettings {
            profile,
            port: self
                .port
                .clone()
                .or_else(|| self.loopback.then(|| LOOPBACK_PORT.to_string())),
            mode: self.mode,
            send: SendOptions {
                cr: self.cr,
                lf: self.lf,
                input: if self.hex_input {
                    InputEncoding::Hex
                } else {
                    InputEncoding::Text
                },
            },
            timestamps: self.timestamps,
            flush_period: Duration::from_millis(self.flush_ms.max(1)),
            reader: ReaderConfig {
                read_timeout,
                ..ReaderConfig::default()
            },
            list_ports: if self.loopback {
                loopback_ports
            } else {
                list_available_ports
            },
        }
    }
}

fn loopback_ports() -> Vec<String> {
    vec![LOOPBACK_PORT.to_string()]
}

async fn run(args: Args) -> Result<()> {
    let store = ProfileStore::new(args.profiles.clone());
    let settings = args.settings(&store);
    let connector: Box<dyn Connector> = if args.loopback {
        info!("Using loopback device");
        Box::new(LoopbackConnector::new(true))
    } else {
        Box::new(SerialConnector::new(settings.reader.read_timeout))
    };
    let connect_at_start = settings.port.is_some() || args.loopback;

    let mut console = Console::new(connector, store, settings, ConsoleDisplay::stdout());
    if connect_at_start {
        if let Err(e) = console.handle_line(":connect").await {
            error!("{e}");
        }
    }
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    console.run(stdin).await
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_ports {
        for port in list_available_ports() {
            println!("{port}");
        }
        return;
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };
    let result = runtime.block_on(run(args));
    // stdin is read on a blocking thread that cannot be interrupted
    runtime.shutdown_timeout(Duration::from_millis(100));

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}
