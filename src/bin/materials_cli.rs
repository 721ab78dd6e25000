use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use fieldops_materials::{
    catalog::{self, Category},
    config,
    Material, MaterialPatch, MaterialsContext, NewMaterial, UsageType, WithdrawRequest,
    WithdrawResult,
};
use futures::future::join_all;
use serde::Serialize;
use tracing::warn;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut app_config = config::load_config().context("failed to load application config")?;
    if cli.offline {
        app_config.remote_backend = "offline".to_string();
    }
    config::init_tracing(app_config.log_level(), app_config.log_json);

    let context = MaterialsContext::initialize(app_config)
        .await
        .context("failed to initialize material services")?;

    let outcome = run(&context, cli.command, cli.json).await;
    context.shutdown().await;
    outcome
}

#[derive(Parser)]
#[command(
    name = "materials",
    about = "Inspect and adjust material stock for field jobs",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Skip the remote store and work against the local cache only"
    )]
    offline: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List materials
    List(ListArgs),
    /// Show one material
    Show { id: String },
    /// Add a material
    Add(AddArgs),
    /// Update fields of a material
    Update(UpdateArgs),
    /// Add stock to a material
    Restock { id: String, quantity: i64 },
    /// Show the built-in seed catalog grouped by category
    Catalog,
    /// Withdraw materials for a job, e.g. `withdraw net-001=20 net-002=4`
    Withdraw {
        #[arg(required = true, value_parser = parse_withdraw_line)]
        items: Vec<WithdrawRequest>,
    },
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    category: Option<Category>,
    #[arg(long, action = ArgAction::SetTrue)]
    low_stock: bool,
}

#[derive(Args)]
struct AddArgs {
    #[arg(long)]
    id: Option<String>,
    #[arg(long)]
    name: String,
    #[arg(long)]
    category: Category,
    #[arg(long, default_value = "consumable")]
    usage_type: UsageType,
    #[arg(long)]
    unit: String,
    #[arg(long, default_value_t = 0)]
    stock: u32,
    #[arg(long, default_value_t = 0)]
    min_stock: u32,
}

#[derive(Args)]
struct UpdateArgs {
    id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    category: Option<Category>,
    #[arg(long)]
    usage_type: Option<UsageType>,
    #[arg(long)]
    unit: Option<String>,
    #[arg(long)]
    stock: Option<u32>,
    #[arg(long)]
    min_stock: Option<u32>,
}

async fn run(context: &MaterialsContext, command: Commands, json: bool) -> Result<()> {
    let store = context.store();

    match command {
        Commands::List(args) => {
            let mut materials: Vec<Material> = if args.low_stock {
                store.low_stock()
            } else {
                store.snapshot().to_vec()
            };
            if let Some(category) = args.category {
                materials.retain(|m| m.category == category.as_ref());
            }
            if json {
                print_json(&materials)?;
            } else if materials.is_empty() {
                println!("No materials found");
            } else {
                materials.iter().for_each(render_material);
            }
        }
        Commands::Show { id } => {
            let material = store
                .get_material_by_id(&id)
                .ok_or_else(|| anyhow!("material {} not found", id))?;
            if json {
                print_json(&material)?;
            } else {
                render_material(&material);
            }
        }
        Commands::Add(args) => {
            let material = store
                .add_material(NewMaterial {
                    id: args.id,
                    name: args.name,
                    category: args.category.to_string(),
                    usage_type: args.usage_type,
                    unit: args.unit,
                    stock: args.stock,
                    min_stock: args.min_stock,
                })
                .await
                .context("failed to add material")?;
            if json {
                print_json(&material)?;
            } else {
                println!("Added material {}", material.id);
                render_material(&material);
            }
        }
        Commands::Update(args) => {
            let id = args.id.clone();
            let patch = MaterialPatch {
                name: args.name,
                category: args.category.map(|c| c.to_string()),
                usage_type: args.usage_type,
                unit: args.unit,
                stock: args.stock,
                min_stock: args.min_stock,
            };
            if patch.is_empty() {
                return Err(anyhow!("nothing to update; pass at least one field"));
            }
            store.update_material(&id, patch).await;
            print_current(context, &id, json)?;
        }
        Commands::Restock { id, quantity } => {
            if quantity <= 0 {
                return Err(anyhow!("restock quantity must be greater than zero"));
            }
            store.restock_material(&id, quantity).await;
            print_current(context, &id, json)?;
        }
        Commands::Catalog => {
            let groups = catalog::grouped();
            if json {
                let by_name: std::collections::BTreeMap<String, Vec<Material>> = groups
                    .into_iter()
                    .map(|(category, materials)| (category.to_string(), materials))
                    .collect();
                print_json(&by_name)?;
            } else {
                for (category, materials) in groups {
                    println!("{}:", category);
                    materials.iter().for_each(render_material);
                }
            }
        }
        Commands::Withdraw { items } => {
            let (result, pending) = context.engine().withdraw_materials_tracked(&items);
            for joined in join_all(pending).await {
                if let Err(e) = joined {
                    warn!(error = %e, "Withdrawal task did not complete");
                }
            }
            render_withdraw_result(&result, json)?;
            if !result.is_success() {
                return Err(anyhow!("withdrawal rejected"));
            }
        }
    }

    Ok(())
}

fn parse_withdraw_line(raw: &str) -> Result<WithdrawRequest, String> {
    let (id, quantity) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <material-id>=<quantity>, got '{}'", raw))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(format!("missing material id in '{}'", raw));
    }
    let quantity = quantity
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid quantity in '{}': {}", raw, e))?;
    Ok(WithdrawRequest::new(id, quantity))
}

fn print_current(context: &MaterialsContext, id: &str, json: bool) -> Result<()> {
    match context.store().get_material_by_id(id) {
        Some(material) if json => print_json(&material),
        Some(material) => {
            render_material(&material);
            Ok(())
        }
        None => Err(anyhow!("material {} not found", id)),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_material(material: &Material) {
    let mut flags = Vec::new();
    if material.is_local {
        flags.push("local only");
    }
    if material.is_low_stock() {
        flags.push("low stock");
    }
    let suffix = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };
    println!(
        "- {} • {} • {} • {} • {} {} (min {}){}",
        material.id,
        material.name,
        material.category,
        material.usage_type,
        material.stock,
        material.unit,
        material.min_stock,
        suffix
    );
}

fn render_withdraw_result(result: &WithdrawResult, json: bool) -> Result<()> {
    if json {
        return print_json(result);
    }
    match result {
        WithdrawResult::Success => println!("Withdrawal recorded"),
        WithdrawResult::Rejected { errors } => {
            println!("Withdrawal rejected:");
            for error in errors {
                println!("  - {}", error);
            }
        }
    }
    Ok(())
}
