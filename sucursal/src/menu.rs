use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use rand::Rng;
use sucursal_coord::Node;
use sucursal_proto::{Op, OrderedF64};
use tracing::warn;

/// Top-level menu (spec §6: five entries, nested sub-menus). Loops until
/// "quit" clears `running` (or a signal handler exits the process directly).
pub fn main_menu(node: &Arc<Node>, running: &Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        println!("\n=== Sucursal ===");
        println!("1. Customers");
        println!("2. Articles");
        println!("3. Shipping guides");
        println!("4. Branch status");
        println!("0. Quit");

        match prompt("Choose an option: ").as_str() {
            "1" => customer_menu(node),
            "2" => article_menu(node),
            "3" => guide_menu(node),
            "4" => branch_status(node),
            "0" => running.store(false, Ordering::SeqCst),
            _ => println!("Invalid option."),
        }
    }
}

fn customer_menu(node: &Arc<Node>) {
    loop {
        println!("\n--- Customers ---");
        println!("1. Create customer");
        println!("2. List customers");
        println!("3. Update customer");
        println!("4. Activate customer");
        println!("5. Deactivate customer");
        println!("0. Back");

        match prompt("Choose an option: ").as_str() {
            "1" => create_customer(node),
            "2" => list_customers(node),
            "3" => update_customer(node),
            "4" => set_customer_active(node, true),
            "5" => set_customer_active(node, false),
            "0" => return,
            _ => println!("Invalid option."),
        }
    }
}

fn create_customer(node: &Arc<Node>) {
    let username = prompt("Username: ");
    if node.store().username_exists(&username).unwrap_or(false) {
        println!("That username is already in use.");
        return;
    }
    let card: i64 = match prompt("Card number: ").parse() {
        Ok(c) => c,
        Err(_) => return println!("Card number must be an integer."),
    };
    if node.store().card_in_use(card).unwrap_or(false) {
        println!("That card is already in use.");
        return;
    }
    let name = prompt("Name: ");
    let address = prompt("Address: ");

    submit(node, Op::CreateCliente { username, name, address, card });
}

fn update_customer(node: &Arc<Node>) {
    let username = prompt("Username to update: ");
    if !node.store().username_exists(&username).unwrap_or(false) {
        println!("No such customer.");
        return;
    }
    let name = prompt("New name: ");
    let address = prompt("New address: ");
    let card: i64 = match prompt("New card number: ").parse() {
        Ok(c) => c,
        Err(_) => return println!("Card number must be an integer."),
    };
    submit(node, Op::UpdateCliente { username, name, address, card });
}

fn set_customer_active(node: &Arc<Node>, active: bool) {
    let username = prompt(if active { "Username to activate: " } else { "Username to deactivate: " });
    if !node.store().username_exists(&username).unwrap_or(false) {
        println!("No such customer.");
        return;
    }
    let op = if active { Op::ActivateCliente { username } } else { Op::DeactivateCliente { username } };
    submit(node, op);
}

fn list_customers(node: &Arc<Node>) {
    match node.store().list_customers() {
        Ok(rows) => {
            for c in rows {
                println!("{:>4} {:<16} {:<24} {:<24} {:<10} {:?}", c.id, c.username, c.name, c.address, c.card, c.status);
            }
        }
        Err(e) => println!("failed to list customers: {e}"),
    }
}

fn article_menu(node: &Arc<Node>) {
    loop {
        println!("\n--- Articles ---");
        println!("1. Create article");
        println!("2. List articles");
        println!("3. Update article");
        println!("4. Restock article");
        println!("5. Deactivate article");
        println!("0. Back");

        match prompt("Choose an option: ").as_str() {
            "1" => create_article(node),
            "2" => list_articles(node),
            "3" => update_article(node),
            "4" => restock_article(node),
            "5" => deactivate_article(node),
            "0" => return,
            _ => println!("Invalid option."),
        }
    }
}

fn create_article(node: &Arc<Node>) {
    let code: i64 = match prompt("Code: ").parse() {
        Ok(c) => c,
        Err(_) => return println!("Code must be an integer."),
    };
    if node.store().code_exists(code).unwrap_or(false) {
        println!("That code is already in use.");
        return;
    }
    let name = prompt("Name: ");
    let price: f64 = match prompt("Price: ").parse() {
        Ok(p) => p,
        Err(_) => return println!("Price must be a number."),
    };
    let branch_id = node.registry().self_id();

    submit(node, Op::CreateArticulo { code, name, price: OrderedF64(price), branch_id });
}

fn update_article(node: &Arc<Node>) {
    let code: i64 = match prompt("Code to update: ").parse() {
        Ok(c) => c,
        Err(_) => return println!("Code must be an integer."),
    };
    if !node.store().code_exists(code).unwrap_or(false) {
        println!("No such article.");
        return;
    }
    let name = prompt("New name: ");
    let price: f64 = match prompt("New price: ").parse() {
        Ok(p) => p,
        Err(_) => return println!("Price must be a number."),
    };
    submit(node, Op::UpdateArticulo { code, name, price: OrderedF64(price) });
}

fn restock_article(node: &Arc<Node>) {
    let code: i64 = match prompt("Code to restock: ").parse() {
        Ok(c) => c,
        Err(_) => return println!("Code must be an integer."),
    };
    submit(node, Op::RestockArticulo { code });
}

fn deactivate_article(node: &Arc<Node>) {
    let code: i64 = match prompt("Code to deactivate: ").parse() {
        Ok(c) => c,
        Err(_) => return println!("Code must be an integer."),
    };
    submit(node, Op::DeactivateArticulo { code });
}

fn list_articles(node: &Arc<Node>) {
    match node.store().list_articles() {
        Ok(rows) => {
            for a in rows {
                println!("{:>4} {:<10} {:<24} {:>10.2} {:?}", a.id, a.code, a.name, a.price, a.stock);
            }
        }
        Err(e) => println!("failed to list articles: {e}"),
    }
}

fn guide_menu(node: &Arc<Node>) {
    loop {
        println!("\n--- Shipping guides ---");
        println!("1. Purchase");
        println!("2. List shipping guides");
        println!("0. Back");

        match prompt("Choose an option: ").as_str() {
            "1" => purchase(node),
            "2" => list_guides(node),
            "0" => return,
            _ => println!("Invalid option."),
        }
    }
}

/// "Comprar" (spec §4.3 `create_guia_envio`, `original_source/
/// Middleware_BD_Comm.py`'s `guia_envio_menu`): validates username/code,
/// active status and stock before ever reaching `initiate`, then derives
/// `serial` and `purchase_ts` the same way the source does (clock fields
/// plus a small random tiebreaker) rather than accepting them as input.
fn purchase(node: &Arc<Node>) {
    let username = prompt("Customer username: ");
    let code: i64 = match prompt("Article code: ").parse() {
        Ok(c) => c,
        Err(_) => return println!("Code must be an integer."),
    };

    let store = node.store();
    if !store.username_exists(&username).unwrap_or(false) || !store.code_exists(code).unwrap_or(false) {
        println!("Unknown customer or article.");
        return;
    }
    if !store.customer_active(&username).unwrap_or(false) {
        println!("Customer is not active.");
        return;
    }
    if !store.article_available(code).unwrap_or(false) {
        println!("Article is out of stock.");
        return;
    }

    let customer_id = match store.customer_id(&username) {
        Ok(id) => id,
        Err(e) => return println!("failed to look up customer: {e}"),
    };
    let article_id = match store.article_id(code) {
        Ok(id) => id,
        Err(e) => return println!("failed to look up article: {e}"),
    };
    let amount = match store.article_price(code) {
        Ok(p) => p,
        Err(e) => return println!("failed to look up price: {e}"),
    };
    let branch_id = node.registry().self_id();

    // Matches the source's `serie` formula exactly: a sum of the clock
    // fields plus the branch id plus a small random tiebreaker, not a
    // concatenation (original_source/Middleware_BD_Comm.py, guia_envio_menu).
    let now = Local::now();
    use chrono::Datelike as _;
    use chrono::Timelike as _;
    let serial = now.year() as i64
        + now.month() as i64
        + now.day() as i64
        + now.hour() as i64
        + now.minute() as i64
        + now.second() as i64
        + branch_id.0
        + rand::thread_rng().gen_range(1..=100);
    let purchase_ts = now.format("%Y-%m-%d %H:%M:%S").to_string();

    submit(
        node,
        Op::CreateGuiaEnvio {
            customer_id,
            article_id,
            branch_id,
            serial,
            amount: OrderedF64(amount),
            purchase_ts,
        },
    );
}

fn list_guides(node: &Arc<Node>) {
    match node.store().list_guides() {
        Ok(rows) => {
            for g in rows {
                println!("{:>4} cust={} art={} serial={} amount={:.2} at {}", g.id, g.customer_id, g.article_id, g.serial, g.amount, g.purchase_ts);
            }
        }
        Err(e) => println!("failed to list shipping guides: {e}"),
    }
}

fn branch_status(node: &Arc<Node>) {
    println!("\n--- Branch status ---");
    for b in node.registry().all() {
        println!(
            "{:>3} {:<16} master={:<5} status={:?} self={}",
            b.id, b.ip, b.is_master, b.status, b.is_self
        );
    }
}

/// Runs one mutation through the coordinator, reporting a `ValidationError`-
/// style refusal to the UI without ever reaching `start_consensus` (spec §7:
/// "ValidationError... surfaced to the UI; round not initiated" — the
/// per-field duplicate checks above this call are that check).
fn submit(node: &Arc<Node>, op: Op) {
    if let Err(e) = node.initiate(op) {
        warn!(error = %e, "write did not complete");
        println!("Write failed: {e}");
    } else {
        println!("OK.");
    }
}

fn prompt(label: &str) -> String {
    print!("{label}");
    io::stdout().flush().ok();
    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_err() {
        return String::new();
    }
    line.trim().to_string()
}
