//! # Seed Data Generator
//!
//! Populates a development database with branches, products, stock and
//! customers so the server can take sales straight away.
//!
//! ## Usage
//! ```bash
//! # 60 products across 3 branches (default)
//! cargo run -p tally-db --bin seed
//!
//! # Custom amount
//! cargo run -p tally-db --bin seed -- --count 200
//!
//! # Specify database path
//! cargo run -p tally-db --bin seed -- --db ./data/tally.db
//! ```
//!
//! ## Generated Data
//! - Branches `MAIN`, `NORTH`, `SOUTH`
//! - Products with prices from 0.99 to 19.99 and tax rates 0%, 5%, 8.25%, 10%
//! - Opening stock per branch via the stock ledger, so every unit has an IN
//!   movement behind it
//! - A handful of loyalty customers

use std::env;
use tally_core::{Branch, CatalogProduct, Customer};
use tally_db::{Database, DbConfig};

const BRANCHES: &[(i64, &str, &str)] = &[
    (1, "MAIN", "Main Street"),
    (2, "NORTH", "North Mall"),
    (3, "SOUTH", "South Station"),
];

const PRODUCT_NAMES: &[&str] = &[
    "Coca-Cola 330ml",
    "Sparkling Water 500ml",
    "Orange Juice 1L",
    "Potato Chips",
    "Chocolate Bar",
    "Gummy Bears",
    "Whole Milk 1L",
    "Cheddar Cheese",
    "Greek Yogurt",
    "Vanilla Ice Cream",
    "Spaghetti 500g",
    "Basmati Rice 1kg",
    "Canned Tomatoes",
    "Peanut Butter",
    "Coffee Beans 250g",
];

const CUSTOMERS: &[(i64, &str)] = &[
    (1, "Ada Lovelace"),
    (2, "Grace Hopper"),
    (3, "Alan Turing"),
    (4, "Edsger Dijkstra"),
];

/// Tax rates in basis points
const TAX_RATES: &[u32] = &[0, 500, 825, 1000];

/// User id recorded on the opening stock movements.
const SEED_USER_ID: i64 = 0;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut count: usize = 60;
    let mut db_path = String::from("./tally_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(60);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tally Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of products to generate (default: 60)");
                println!("  -d, --db <PATH>    Database file path (default: ./tally_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Tally Seed Data Generator");
    println!("===========================");
    println!("Database: {}", db_path);
    println!("Products: {}", count);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.catalog().list_products(false).await?.len();
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    for &(id, code, name) in BRANCHES {
        db.catalog()
            .upsert_branch(&Branch {
                id,
                code: code.to_string(),
                name: name.to_string(),
            })
            .await?;
    }
    println!("✓ {} branches", BRANCHES.len());

    println!();
    println!("Generating products...");
    let start = std::time::Instant::now();
    let mut movements = 0;

    for seed in 0..count {
        let product = generate_product(seed);
        db.catalog().upsert_product(&product).await?;

        for &(branch_id, code, _) in BRANCHES {
            // Leave some shelves low so the low-stock report has content
            let opening = ((seed * 7 + branch_id as usize * 13) % 60) as i64;
            if opening == 0 {
                continue;
            }
            db.inventory()
                .receive(
                    product.id,
                    branch_id,
                    opening,
                    Some(product.selling_price_cents * 6 / 10),
                    Some(&format!("OPENING-{code}")),
                    None,
                    SEED_USER_ID,
                )
                .await?;
            movements += 1;
        }
    }

    let elapsed = start.elapsed();
    println!("✓ Generated {} products, {} stock movements in {:?}", count, movements, elapsed);

    for &(id, name) in CUSTOMERS {
        db.customers()
            .upsert_customer(&Customer {
                id,
                name: name.to_string(),
                loyalty_points: 0,
                total_purchases_cents: 0,
            })
            .await?;
    }
    println!("✓ {} customers", CUSTOMERS.len());

    println!();
    println!("Verifying...");
    for &(branch_id, code, _) in BRANCHES {
        let low = db.inventory().low_stock(Some(branch_id)).await?;
        println!("  {}: {} products at or below reorder level", code, low.len());
    }

    println!();
    println!("✓ Seed complete!");

    Ok(())
}

/// Generates a single product with realistic data.
fn generate_product(seed: usize) -> CatalogProduct {
    let base = PRODUCT_NAMES[seed % PRODUCT_NAMES.len()];
    let batch = seed / PRODUCT_NAMES.len();
    let name = if batch == 0 {
        base.to_string()
    } else {
        format!("{} #{}", base, batch + 1)
    };

    // 0.99 - 19.99
    let selling_price_cents = 99 + ((seed * 137) % 1901) as i64;

    CatalogProduct {
        id: seed as i64 + 1,
        name,
        selling_price_cents,
        tax_rate_bps: TAX_RATES[seed % TAX_RATES.len()],
        reorder_level: 5 + (seed % 4) as i64 * 5,
        is_active: true,
    }
}
