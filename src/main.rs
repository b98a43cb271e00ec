use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mexc_ledger::{
    config::{format_amount, parse_amount, LedgerConfig},
    Address, Call, LedgerEvent, LedgerSnapshot, LedgerState, Operation, Receipt, SharedLedger,
    SignedCall,
};

#[derive(Parser)]
#[command(name = "mexc-ledger", version, about = "MEXC token ledger CLI")]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Ledger state file (overrides the config)
    #[arg(long, global = true)]
    state: Option<String>,

    #[arg(long, value_enum, default_value = "text", global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an ed25519 keypair and print its address
    Keygen(KeygenArgs),
    /// Print the address owned by a signing key
    Address(KeyArgs),
    /// Create a fresh ledger at genesis
    Init(InitArgs),
    Mint(MintArgs),
    Transfer(TransferArgs),
    TransferFrom(TransferFromArgs),
    Burn(BurnArgs),
    AllowTransfers(KeyArgs),
    DisableTransfers(KeyArgs),
    Blacklist(TargetArgs),
    Confiscate(TargetArgs),
    Balance(BalanceArgs),
    Supply,
    Status,
    Events,
    /// Re-check the supply invariant and state root of the state file
    Verify,
}

#[derive(Args)]
struct KeygenArgs {
    #[arg(long)]
    out_dir: PathBuf,
}

#[derive(Args)]
struct KeyArgs {
    /// Hex-encoded ed25519 secret key of the caller
    #[arg(long)]
    key: PathBuf,
}

#[derive(Args)]
struct InitArgs {
    #[arg(long)]
    admin: Option<String>,

    /// Overwrite an existing state file
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct MintArgs {
    #[command(flatten)]
    key: KeyArgs,
    recipient: String,
    amount: String,
}

#[derive(Args)]
struct TransferArgs {
    #[command(flatten)]
    key: KeyArgs,
    to: String,
    amount: String,
}

#[derive(Args)]
struct TransferFromArgs {
    #[command(flatten)]
    key: KeyArgs,
    from: String,
    to: String,
    amount: String,
}

#[derive(Args)]
struct BurnArgs {
    #[command(flatten)]
    key: KeyArgs,
    amount: String,
}

#[derive(Args)]
struct TargetArgs {
    #[command(flatten)]
    key: KeyArgs,
    target: String,
}

#[derive(Args)]
struct BalanceArgs {
    address: String,
}

struct AppContext {
    config: LedgerConfig,
    state_path: PathBuf,
    output: OutputFormat,
}

#[derive(Serialize)]
struct KeygenOutput {
    address: String,
    secret_key_path: String,
    public_key_path: String,
}

#[derive(Serialize)]
struct ReceiptOutput<'a> {
    caller: String,
    operation: &'a str,
    receipt: &'a Receipt,
    total_supply: String,
}

#[derive(Serialize)]
struct BalanceOutput {
    address: String,
    balance: String,
    raw: String,
    blacklisted: bool,
}

#[derive(Serialize)]
struct StatusOutput {
    symbol: String,
    decimals: u8,
    admin: String,
    transfer_disabled: bool,
    total_supply: String,
    height: u64,
    blacklisted: usize,
    state_root: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    let config = LedgerConfig::load(cli.config.as_deref())?;
    let state_path = match &cli.state {
        Some(path) => mexc_ledger::config::expand_tilde(path),
        None => config.state_path(),
    };
    let ctx = AppContext {
        config,
        state_path,
        output: cli.output,
    };

    match &cli.command {
        Commands::Keygen(args) => handle_keygen(&ctx, args),
        Commands::Address(args) => handle_address(&ctx, args),
        Commands::Init(args) => handle_init(&ctx, args),
        Commands::Mint(args) => {
            let recipient = parse_address(&args.recipient)?;
            submit(&ctx, &args.key, |ledger| {
                Ok(Operation::Mint {
                    target: recipient,
                    amount: parse_amount(&args.amount, ledger.decimals())?,
                })
            })
        }
        Commands::Transfer(args) => {
            let to = parse_address(&args.to)?;
            submit(&ctx, &args.key, |ledger| {
                Ok(Operation::Transfer {
                    to,
                    amount: parse_amount(&args.amount, ledger.decimals())?,
                })
            })
        }
        Commands::TransferFrom(args) => {
            let from = parse_address(&args.from)?;
            let to = parse_address(&args.to)?;
            submit(&ctx, &args.key, |ledger| {
                Ok(Operation::TransferFrom {
                    from,
                    to,
                    amount: parse_amount(&args.amount, ledger.decimals())?,
                })
            })
        }
        Commands::Burn(args) => submit(&ctx, &args.key, |ledger| {
            Ok(Operation::Burn {
                amount: parse_amount(&args.amount, ledger.decimals())?,
            })
        }),
        Commands::AllowTransfers(args) => submit(&ctx, args, |_| Ok(Operation::AllowTransfers)),
        Commands::DisableTransfers(args) => {
            submit(&ctx, args, |_| Ok(Operation::DisableTransfers))
        }
        Commands::Blacklist(args) => {
            let target = parse_address(&args.target)?;
            submit(&ctx, &args.key, |_| Ok(Operation::BlackListAddress { target }))
        }
        Commands::Confiscate(args) => {
            let target = parse_address(&args.target)?;
            submit(&ctx, &args.key, |_| Ok(Operation::Confiscate { target }))
        }
        Commands::Balance(args) => handle_balance(&ctx, args),
        Commands::Supply => handle_supply(&ctx),
        Commands::Status => handle_status(&ctx),
        Commands::Events => handle_events(&ctx),
        Commands::Verify => handle_verify(&ctx),
    }
}

fn handle_keygen(ctx: &AppContext, args: &KeygenArgs) -> Result<()> {
    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;

    let mut sk_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut sk_bytes);
    let sk = SigningKey::from_bytes(&sk_bytes);
    let pk = sk.verifying_key();
    let address = Address::from_verifying_key(&pk);

    let sk_path = args.out_dir.join("sk.hex");
    let pk_path = args.out_dir.join("pk.hex");
    write_file(&sk_path, hex::encode(sk_bytes).as_bytes())?;
    write_file(&pk_path, hex::encode(pk.as_bytes()).as_bytes())?;

    if ctx.output == OutputFormat::Json {
        print_json(&KeygenOutput {
            address: address.to_string(),
            secret_key_path: sk_path.display().to_string(),
            public_key_path: pk_path.display().to_string(),
        })
    } else {
        println!("Keypair written to {}", args.out_dir.display());
        println!("Address: {}", address);
        Ok(())
    }
}

fn handle_address(ctx: &AppContext, args: &KeyArgs) -> Result<()> {
    let key = read_signing_key(&args.key)?;
    let address = Address::from_verifying_key(&key.verifying_key());
    if ctx.output == OutputFormat::Json {
        print_json(&serde_json::json!({ "address": address.to_string() }))
    } else {
        println!("{}", address);
        Ok(())
    }
}

fn handle_init(ctx: &AppContext, args: &InitArgs) -> Result<()> {
    if ctx.state_path.exists() && !args.force {
        bail!(
            "State file {} already exists (use --force to overwrite)",
            ctx.state_path.display()
        );
    }
    let admin = match &args.admin {
        Some(admin) => parse_address(admin)?,
        None => ctx
            .config
            .genesis_admin()?
            .ok_or_else(|| anyhow!("No admin given: pass --admin or set [genesis] admin"))?,
    };
    let token = ctx.config.token_metadata()?;
    let ledger = SharedLedger::new(LedgerState::genesis(admin, token));
    save_ledger(&ctx.state_path, &ledger)?;
    info!(path = %ctx.state_path.display(), "genesis state written");
    handle_status(ctx)
}

/// Sign `operation` with the caller key, apply it and persist the result.
fn submit<F>(ctx: &AppContext, key: &KeyArgs, operation: F) -> Result<()>
where
    F: FnOnce(&LedgerState) -> Result<Operation>,
{
    let sk = read_signing_key(&key.key)?;
    let caller = Address::from_verifying_key(&sk.verifying_key());
    let ledger = load_ledger(&ctx.state_path)?;
    let operation = ledger.read(operation)?;
    let name = operation.name();
    let signed = SignedCall::sign(Call::new(caller, operation), &sk);

    let receipt = ledger
        .submit(&signed)
        .with_context(|| format!("{} rejected", name))?;
    save_ledger(&ctx.state_path, &ledger)?;

    let (decimals, total_supply) =
        ledger.read(|state| (state.decimals(), state.total_supply()));
    if ctx.output == OutputFormat::Json {
        print_json(&ReceiptOutput {
            caller: caller.to_string(),
            operation: name,
            receipt: &receipt,
            total_supply: total_supply.to_string(),
        })
    } else {
        println!("{} committed at height {}", name, receipt.height);
        for event in &receipt.events {
            println!("  {}", describe_event(event, decimals));
        }
        println!("Total supply: {}", format_amount(total_supply, decimals));
        Ok(())
    }
}

fn handle_balance(ctx: &AppContext, args: &BalanceArgs) -> Result<()> {
    let address = parse_address(&args.address)?;
    let ledger = load_ledger(&ctx.state_path)?;
    let (account, decimals, symbol) = ledger.read(|state| {
        (
            state.account(&address),
            state.decimals(),
            state.symbol().to_string(),
        )
    });
    if ctx.output == OutputFormat::Json {
        print_json(&BalanceOutput {
            address: address.to_string(),
            balance: format_amount(account.balance, decimals),
            raw: account.balance.to_string(),
            blacklisted: account.blacklisted,
        })
    } else {
        println!(
            "{}: {} {}{}",
            address,
            format_amount(account.balance, decimals),
            symbol,
            if account.blacklisted {
                " (blacklisted)"
            } else {
                ""
            }
        );
        Ok(())
    }
}

fn handle_supply(ctx: &AppContext) -> Result<()> {
    let ledger = load_ledger(&ctx.state_path)?;
    let (supply, decimals, symbol) = ledger.read(|state| {
        (
            state.total_supply(),
            state.decimals(),
            state.symbol().to_string(),
        )
    });
    if ctx.output == OutputFormat::Json {
        print_json(&serde_json::json!({
            "total_supply": format_amount(supply, decimals),
            "raw": supply.to_string(),
        }))
    } else {
        println!("{} {}", format_amount(supply, decimals), symbol);
        Ok(())
    }
}

fn handle_status(ctx: &AppContext) -> Result<()> {
    let ledger = load_ledger(&ctx.state_path)?;
    let status = ledger.read(|state| StatusOutput {
        symbol: state.symbol().to_string(),
        decimals: state.decimals(),
        admin: state.admin().to_string(),
        transfer_disabled: state.transfer_disabled(),
        total_supply: format_amount(state.total_supply(), state.decimals()),
        height: state.height(),
        blacklisted: state.access().blacklisted().count(),
        state_root: hex::encode(state.state_root()),
    });
    if ctx.output == OutputFormat::Json {
        print_json(&status)
    } else {
        println!("Symbol:            {}", status.symbol);
        println!("Decimals:          {}", status.decimals);
        println!("Admin:             {}", status.admin);
        println!("Transfer disabled: {}", status.transfer_disabled);
        println!("Total supply:      {}", status.total_supply);
        println!("Height:            {}", status.height);
        println!("Blacklisted:       {}", status.blacklisted);
        println!("State root:        {}", status.state_root);
        Ok(())
    }
}

fn handle_events(ctx: &AppContext) -> Result<()> {
    let ledger = load_ledger(&ctx.state_path)?;
    let (events, decimals) = ledger.read(|state| (state.events().to_vec(), state.decimals()));
    if ctx.output == OutputFormat::Json {
        print_json(&events)
    } else {
        if events.is_empty() {
            println!("No events recorded");
        }
        for (idx, event) in events.iter().enumerate() {
            println!("{:>6}  {}", idx, describe_event(event, decimals));
        }
        Ok(())
    }
}

fn handle_verify(ctx: &AppContext) -> Result<()> {
    // load_ledger already rejects a bad root or supply mismatch
    let ledger = load_ledger(&ctx.state_path)?;
    ledger.read(LedgerState::check_invariants)?;
    let root = ledger.read(LedgerState::state_root);
    if ctx.output == OutputFormat::Json {
        print_json(&serde_json::json!({ "ok": true, "state_root": hex::encode(root) }))
    } else {
        println!("Ledger consistent, state root {}", hex::encode(root));
        Ok(())
    }
}

fn describe_event(event: &LedgerEvent, decimals: u8) -> String {
    match event {
        LedgerEvent::Mint { to, amount } => {
            format!("mint {} -> {}", format_amount(*amount, decimals), to)
        }
        LedgerEvent::Transfer { from, to, amount } => format!(
            "transfer {} {} -> {}",
            format_amount(*amount, decimals),
            from,
            to
        ),
        LedgerEvent::Burn { from, amount } => {
            format!("burn {} from {}", format_amount(*amount, decimals), from)
        }
        LedgerEvent::Confiscate {
            target,
            seized,
            beneficiary,
        } => format!(
            "confiscate {} from {} -> {}",
            format_amount(*seized, decimals),
            target,
            beneficiary
        ),
        LedgerEvent::Blacklisted { target } => format!("blacklisted {}", target),
        LedgerEvent::TransfersToggled { enabled } => {
            format!("transfers {}", if *enabled { "enabled" } else { "disabled" })
        }
    }
}

fn load_ledger(path: &Path) -> Result<SharedLedger> {
    let bytes = fs::read(path).with_context(|| {
        format!(
            "Failed to read ledger state {} (run `init` first)",
            path.display()
        )
    })?;
    let snapshot: LedgerSnapshot =
        serde_json::from_slice(&bytes).context("Failed to parse ledger state")?;
    let state = LedgerState::from_snapshot(snapshot)?;
    Ok(SharedLedger::new(state))
}

fn save_ledger(path: &Path, ledger: &SharedLedger) -> Result<()> {
    let json = serde_json::to_vec_pretty(&ledger.snapshot())?;
    let tmp = path.with_extension("json.tmp");
    write_file(&tmp, &json)?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

fn read_signing_key(path: &Path) -> Result<SigningKey> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read key: {}", path.display()))?;
    let bytes = hex::decode(contents.trim()).context("Key file is not valid hex")?;
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow!("Secret key must be 32 bytes (64 hex chars)"))?;
    Ok(SigningKey::from_bytes(&arr))
}

fn parse_address(value: &str) -> Result<Address> {
    value
        .parse()
        .map_err(|err| anyhow!("Invalid address {}: {}", value, err))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
