use clap::{Args, Parser, Subcommand};
use log::{error, info, warn, LevelFilter};
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use std::fs;

use emvcrypto::cryptogram::{self, ArqcRequest, CryptogramResponse};
use emvcrypto::cvx::{self, CvxRequest};
use emvcrypto::keys::{CryptogramVersionNumber, UdkDerivationOption};
use emvcrypto::pin::ibm3624::{self, Ibm3624Request};
use emvcrypto::pin::pinblock::{self, PinBlockFormat};
use emvcrypto::pin::pvv::{self, PvvRequest};
use emvcrypto::{get_truncated_pan, Track2, Warning};

macro_rules! serialize_yaml {
    ($file:expr, $static_resource:expr) => {
        serde_yaml::from_str(&fs::read_to_string($file).unwrap_or_else(|_| {
            String::from_utf8_lossy(include_bytes!($static_resource)).to_string()
        }))
        .map_err(|err| format!("Could not parse {}: {}", $file, err))
    };
}

#[derive(Deserialize)]
struct PinSettings {
    decimalization_table: String,
    pin_length: usize,
}

#[derive(Deserialize)]
struct CryptogramSettings {
    udk_derivation_option: Option<UdkDerivationOption>,
    arc: String,
}

#[derive(Deserialize)]
struct Settings {
    censor_sensitive_fields: bool,
    pin: PinSettings,
    cryptogram: CryptogramSettings,
}

impl Settings {
    fn display_pan(&self, pan: &str) -> String {
        if self.censor_sensitive_fields {
            get_truncated_pan(pan)
        } else {
            pan.to_string()
        }
    }
}

#[derive(Parser)]
#[command(
    name = "issuersimulator",
    version,
    about = "EMV issuer host cryptography simulation"
)]
struct Cli {
    /// Settings file, the built-in defaults apply when it is missing
    #[arg(long, value_name = "FILE", default_value = "config/settings.yaml")]
    settings: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate ARQC and ARPC
    Arqc(ArqcArgs),
    /// Check the card's ARQC, the ARPC is printed only for a matching one
    ValidateArqc {
        #[command(flatten)]
        request: ArqcArgs,
        #[arg(long)]
        arqc: String,
    },
    /// Generate or verify CVV, CVV2 or iCVV
    Cvx(CvxArgs),
    /// IBM 3624 PIN from the natural PIN and an optional offset
    Pin(PinArgs),
    /// IBM 3624 offset of a customer selected PIN
    PinOffset(PinOffsetArgs),
    /// Encrypt an ISO 9564 format 0 or 1 PIN block
    PinblockEncode(PinBlockEncodeArgs),
    /// Decrypt an ISO 9564 format 0 or 1 PIN block
    PinblockDecode(PinBlockDecodeArgs),
    /// Generate or verify a Visa PVV
    Pvv(PvvArgs),
}

#[derive(Args)]
struct ArqcArgs {
    /// YAML request file, values given on the command line override it
    #[arg(long, value_name = "FILE")]
    request: Option<String>,
    #[arg(long)]
    pan: Option<String>,
    #[arg(long)]
    pan_sequence_number: Option<String>,
    #[arg(long)]
    master_key: Option<String>,
    #[arg(long)]
    amount_authorised: Option<String>,
    #[arg(long)]
    amount_other: Option<String>,
    #[arg(long)]
    terminal_country_code: Option<String>,
    #[arg(long)]
    tvr: Option<String>,
    #[arg(long)]
    currency_code: Option<String>,
    /// YYYY-MM-DD
    #[arg(long)]
    transaction_date: Option<String>,
    #[arg(long)]
    transaction_type: Option<String>,
    #[arg(long)]
    unpredictable_number: Option<String>,
    #[arg(long)]
    aip: Option<String>,
    #[arg(long)]
    atc: Option<String>,
    #[arg(long)]
    iad: Option<String>,
    /// ARC for CVN 10/14, CSU for CVN 18/22
    #[arg(long)]
    arc_or_csu: Option<String>,
    #[arg(long)]
    cvn: Option<CryptogramVersionNumber>,
    /// UDK derivation option A or B
    #[arg(long)]
    option: Option<UdkDerivationOption>,
}

impl ArqcArgs {
    fn to_request(&self, settings: &Settings) -> Result<ArqcRequest, String> {
        let mut fields = match &self.request {
            Some(file) => {
                let content = fs::read_to_string(file)
                    .map_err(|err| format!("Could not read {}: {}", file, err))?;
                serde_yaml::from_str::<Mapping>(&content)
                    .map_err(|err| format!("Could not parse {}: {}", file, err))?
            }
            None => Mapping::new(),
        };

        let overrides = [
            ("pan", &self.pan),
            ("pan_sequence_number", &self.pan_sequence_number),
            ("master_key", &self.master_key),
            ("amount_authorised", &self.amount_authorised),
            ("amount_other", &self.amount_other),
            ("terminal_country_code", &self.terminal_country_code),
            ("terminal_verification_results", &self.tvr),
            ("transaction_currency_code", &self.currency_code),
            ("transaction_date", &self.transaction_date),
            ("transaction_type", &self.transaction_type),
            ("unpredictable_number", &self.unpredictable_number),
            ("application_interchange_profile", &self.aip),
            ("application_transaction_counter", &self.atc),
            ("issuer_application_data", &self.iad),
            ("arc_or_csu", &self.arc_or_csu),
        ];
        for (key, value) in overrides {
            if let Some(value) = value {
                fields.insert(Value::from(key), Value::from(value.as_str()));
            }
        }

        if let Some(cvn) = self.cvn {
            fields.insert(
                Value::from("cryptogram_version_number"),
                Value::from(cvn.number()),
            );
        }

        if let Some(option) = self.option {
            fields.insert(
                Value::from("udk_derivation_option"),
                Value::from(option.to_string()),
            );
        } else if let Some(option) = settings.cryptogram.udk_derivation_option {
            if !fields.contains_key("udk_derivation_option") {
                fields.insert(
                    Value::from("udk_derivation_option"),
                    Value::from(option.to_string()),
                );
            }
        }

        if !fields.contains_key("arc_or_csu") {
            fields.insert(
                Value::from("arc_or_csu"),
                Value::from(settings.cryptogram.arc.as_str()),
            );
        }

        serde_yaml::from_value(Value::Mapping(fields))
            .map_err(|err| format!("Incomplete ARQC request: {}", err))
    }
}

#[derive(Args)]
struct CvxArgs {
    /// Track 2 data, an alternative to PAN, expiry date and service code
    #[arg(long)]
    track2: Option<String>,
    #[arg(long)]
    pan: Option<String>,
    /// YYMM
    #[arg(long)]
    expiry_date: Option<String>,
    /// 000 for CVV2, 999 for iCVV
    #[arg(long)]
    service_code: Option<String>,
    #[arg(long)]
    cvk: String,
    /// CVX value to verify instead of printing a new one
    #[arg(long)]
    verify: Option<String>,
}

#[derive(Args)]
struct PinArgs {
    #[arg(long)]
    pan: String,
    #[arg(long)]
    pvk: String,
    #[arg(long)]
    pin_length: Option<usize>,
    #[arg(long)]
    decimalization_table: Option<String>,
    #[arg(long)]
    offset: Option<String>,
    /// Verify a customer PIN, read from --customer-pin or prompted for
    #[arg(long)]
    verify: bool,
    #[arg(long)]
    customer_pin: Option<String>,
}

#[derive(Args)]
struct PinOffsetArgs {
    #[arg(long)]
    pan: String,
    #[arg(long)]
    pvk: String,
    #[arg(long)]
    pin_length: Option<usize>,
    #[arg(long)]
    decimalization_table: Option<String>,
    /// Customer selected PIN, prompted for when missing
    #[arg(long)]
    pin: Option<String>,
}

#[derive(Args)]
struct PinBlockEncodeArgs {
    /// 0 or 1
    #[arg(long, default_value = "0")]
    format: PinBlockFormat,
    /// Prompted for when missing
    #[arg(long)]
    pin: Option<String>,
    #[arg(long)]
    pan: Option<String>,
    #[arg(long)]
    zpk: String,
}

#[derive(Args)]
struct PinBlockDecodeArgs {
    #[arg(long)]
    pin_block: String,
    #[arg(long)]
    pan: Option<String>,
    #[arg(long)]
    zpk: String,
}

#[derive(Args)]
struct PvvArgs {
    #[arg(long)]
    pan: String,
    #[arg(long)]
    pvki: String,
    /// Prompted for when missing
    #[arg(long)]
    pin: Option<String>,
    #[arg(long)]
    pvk: String,
    /// PVV to verify instead of printing a new one
    #[arg(long)]
    verify: Option<String>,
}

fn init_logging() -> Result<(), String> {
    if log4rs::init_file("config/log4rs.yaml", Default::default()).is_ok() {
        return Ok(());
    }

    let stdout: ConsoleAppender = ConsoleAppender::builder().build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .map_err(|err| format!("Could not configure logging: {}", err))?;
    log4rs::init_config(config).map_err(|err| format!("Could not initialize logging: {}", err))?;

    Ok(())
}

fn pin_entry(pin: &Option<String>) -> Result<String, String> {
    match pin {
        Some(pin) => Ok(pin.clone()),
        None => rpassword::prompt_password("Enter PIN: ")
            .map(|pin| pin.trim().to_string())
            .map_err(|err| format!("Could not read PIN: {}", err)),
    }
}

fn warnings_message(warnings: &[Warning]) -> Option<String> {
    if warnings.is_empty() {
        return None;
    }

    Some(
        warnings
            .iter()
            .map(|warning| warning.to_string())
            .collect::<Vec<String>>()
            .join("; "),
    )
}

fn print_cryptograms(response: &CryptogramResponse) {
    println!("ARQC: {}", response.arqc);
    println!("ARPC: {}", response.arpc);
    println!("CVN: {}", response.cryptogram_version_number);
    println!("IAD layout: {}", response.iad_layout);
}

fn cvx_request(args: &CvxArgs) -> Result<CvxRequest, String> {
    if let Some(track2) = &args.track2 {
        let track2 = Track2::new(track2).map_err(|err| err.to_string())?;
        let mut request = CvxRequest::from_track2(&track2, &args.cvk);
        if let Some(service_code) = &args.service_code {
            request.service_code = service_code.clone();
        }
        return Ok(request);
    }

    let required = |value: &Option<String>, name: &str| {
        value
            .clone()
            .ok_or_else(|| format!("--{} or --track2 is required", name))
    };

    Ok(CvxRequest {
        pan: required(&args.pan, "pan")?,
        expiry_date: required(&args.expiry_date, "expiry-date")?,
        service_code: required(&args.service_code, "service-code")?,
        card_verification_key: args.cvk.clone(),
    })
}

fn run() -> Result<Option<String>, String> {
    let cli = Cli::parse();

    init_logging()?;

    let settings: Settings = serialize_yaml!(&cli.settings, "../config/settings.yaml")?;

    match &cli.command {
        Command::Arqc(args) => {
            let request = args.to_request(&settings)?;
            info!("Generating ARQC for PAN {}", settings.display_pan(&request.pan));

            let response =
                cryptogram::generate_cryptograms(&request).map_err(|err| err.to_string())?;
            print_cryptograms(&response);
        }
        Command::ValidateArqc { request, arqc } => {
            let request = request.to_request(&settings)?;
            info!("Validating ARQC for PAN {}", settings.display_pan(&request.pan));

            match cryptogram::validate_arqc(&request, arqc).map_err(|err| err.to_string())? {
                Some(response) => print_cryptograms(&response),
                None => return Err("ARQC validation failed".to_string()),
            }
        }
        Command::Cvx(args) => {
            let request = cvx_request(args)?;
            info!("CVX for PAN {}", settings.display_pan(&request.pan));

            match &args.verify {
                Some(value) => {
                    if !cvx::verify_cvx(&request, value).map_err(|err| err.to_string())? {
                        return Err("CVX verification failed".to_string());
                    }
                    println!("CVX verified");
                }
                None => {
                    let response = cvx::generate_cvx(&request).map_err(|err| err.to_string())?;
                    println!("{}: {}", response.cvx_type, response.value);
                }
            }
        }
        Command::Pin(args) => {
            let request = Ibm3624Request {
                pan: args.pan.clone(),
                pin_verification_key: args.pvk.clone(),
                pin_length: args.pin_length.unwrap_or(settings.pin.pin_length),
                decimalization_table: Some(
                    args.decimalization_table
                        .clone()
                        .unwrap_or_else(|| settings.pin.decimalization_table.clone()),
                ),
                offset: args.offset.clone(),
            };
            info!("IBM 3624 PIN for PAN {}", settings.display_pan(&request.pan));

            if args.verify {
                let customer_pin = pin_entry(&args.customer_pin)?;
                let verification =
                    ibm3624::verify_pin(&request, &customer_pin).map_err(|err| err.to_string())?;
                if !verification.verified {
                    return Err("PIN verification failed".to_string());
                }
                println!("PIN verified");
                return Ok(warnings_message(&verification.warnings));
            }

            let response = ibm3624::generate_pin(&request).map_err(|err| err.to_string())?;
            println!("Natural PIN: {}", response.natural_pin);
            println!("PIN: {}", response.pin);
            return Ok(warnings_message(&response.warnings));
        }
        Command::PinOffset(args) => {
            let request = Ibm3624Request {
                pan: args.pan.clone(),
                pin_verification_key: args.pvk.clone(),
                pin_length: args.pin_length.unwrap_or(settings.pin.pin_length),
                decimalization_table: Some(
                    args.decimalization_table
                        .clone()
                        .unwrap_or_else(|| settings.pin.decimalization_table.clone()),
                ),
                offset: None,
            };
            let customer_pin = pin_entry(&args.pin)?;

            let response = ibm3624::generate_offset(&request, &customer_pin)
                .map_err(|err| err.to_string())?;
            println!("Offset: {}", response.offset);
            return Ok(warnings_message(&response.warnings));
        }
        Command::PinblockEncode(args) => {
            let pin = pin_entry(&args.pin)?;

            let pin_block =
                pinblock::encode_pin_block(args.format, &pin, args.pan.as_deref(), &args.zpk)
                    .map_err(|err| err.to_string())?;
            println!("{} PIN block: {}", args.format, pin_block);
        }
        Command::PinblockDecode(args) => {
            let decoded =
                pinblock::decode_pin_block(&args.pin_block, args.pan.as_deref(), &args.zpk)
                    .map_err(|err| err.to_string())?;
            println!(
                "{} PIN ({} digits): {}",
                decoded.format, decoded.pin_length, decoded.pin
            );
        }
        Command::Pvv(args) => {
            let request = PvvRequest {
                pan: args.pan.clone(),
                pin_verification_key_index: args.pvki.clone(),
                pin: pin_entry(&args.pin)?,
                pin_verification_key: args.pvk.clone(),
            };
            info!("PVV for PAN {}", settings.display_pan(&request.pan));

            match &args.verify {
                Some(value) => {
                    if !pvv::verify_pvv(&request, value).map_err(|err| err.to_string())? {
                        return Err("PVV verification failed".to_string());
                    }
                    println!("PVV verified");
                }
                None => {
                    let value = pvv::generate_pvv(&request).map_err(|err| err.to_string())?;
                    println!("PVV: {}", value);
                }
            }
        }
    }

    Ok(None)
}

fn main() {
    std::process::exit(match run() {
        Ok(None) => 0,
        Ok(Some(msg)) => {
            warn!("{}", msg);
            0
        }
        Err(err) => {
            error!("{}", err);
            1
        }
    });
}
