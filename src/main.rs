use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use minutemodem::eparl::Cluster;
use minutemodem::wale::detect::{decode_pdu, detect_waveform};
use minutemodem::wale::frame::{assemble_frame, FrameConfig};
use minutemodem::{
    init_logger, log_info, serve_dte, start_modem, DteServerConfig, KvCommand, ModemConfig,
    Waveform,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "minutemodem")]
#[command(about = "HF WALE modem core with a MIL-110D DTE interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the modem and serve the DTE socket
    Serve {
        #[arg(short, long, default_value = "3000")]
        port: u16,
        /// Waveform: deep or fast
        #[arg(short, long, default_value = "deep")]
        waveform: String,
    },
    /// Assemble a WALE frame and print its symbols as hex digits
    Encode {
        /// Payload as a hex string
        payload: String,
        #[arg(short, long, default_value = "deep")]
        waveform: String,
        /// Prefix capture probes for an asynchronous call
        #[arg(short, long)]
        r#async: bool,
        #[arg(long, default_value = "1")]
        preambles: usize,
        #[arg(long, default_value = "0")]
        tlc_ms: u32,
    },
    /// Detect and decode a symbol file produced by `encode`
    Decode {
        /// File of hex symbol digits
        file: PathBuf,
    },
    /// Run a single-process replicated KV cluster demo
    Cluster {
        #[arg(short, long, default_value = "3")]
        nodes: usize,
    },
}

fn parse_waveform(name: &str) -> anyhow::Result<Waveform> {
    match name {
        "deep" => Ok(Waveform::Deep),
        "fast" => Ok(Waveform::Fast),
        other => bail!("unknown waveform: {other} (expected deep or fast)"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { port, waveform } => {
            let rig = start_modem(ModemConfig {
                waveform: parse_waveform(&waveform)?,
                ..ModemConfig::default()
            });
            let config = DteServerConfig {
                port,
                ..DteServerConfig::default()
            };
            log_info(&format!("serving DTE on port {port}"));
            serve_dte(config, rig).await?;
        }
        Commands::Encode {
            payload,
            waveform,
            r#async,
            preambles,
            tlc_ms,
        } => {
            let pdu = hex::decode(payload.trim()).context("payload must be hex")?;
            let config = FrameConfig {
                waveform: parse_waveform(&waveform)?,
                async_call: r#async,
                preamble_count: preambles,
                tlc_ms,
                ..FrameConfig::default()
            };
            let symbols = assemble_frame(&pdu, &config)?;
            eprintln!(
                "{} symbols ({} ms on air)",
                symbols.len(),
                minutemodem::constants::symbols_to_ms(symbols.len())
            );
            let digits: String = symbols.iter().map(|s| char::from(b'0' + s)).collect();
            println!("{digits}");
        }
        Commands::Decode { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let symbols: Vec<u8> = text
                .chars()
                .filter(|c| c.is_ascii_digit())
                .map(|c| c as u8 - b'0')
                .collect();

            let detection = detect_waveform(&symbols)?;
            eprintln!(
                "detected {:?} (score {}, countdown {}, M={})",
                detection.waveform, detection.score, detection.countdown, detection.more_pdus
            );
            let decoded = decode_pdu(detection.waveform, &symbols[detection.data_offset..])?;
            println!("{}", hex::encode(decoded));
        }
        Commands::Cluster { nodes } => {
            let cluster: Cluster<KvCommand> = Cluster::new(nodes, Default::default());
            log_info(&format!("{nodes}-replica cluster up"));

            cluster
                .replica(0)
                .propose(KvCommand::Put {
                    key: "callsign".into(),
                    value: "W1AW".into(),
                })
                .await?;
            let value = cluster
                .replica(nodes.saturating_sub(1))
                .propose(KvCommand::Get {
                    key: "callsign".into(),
                })
                .await?;
            println!("replicated read: {value:?}");
        }
    }

    Ok(())
}
