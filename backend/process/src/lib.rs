//! # Menu Loading
//!
//! Seeds the menu from a JSON file instead of typing every item into the admin panel.
//!
//! ## Flow
//! 1. Read the menu file, an array of `{name, options, image_url}` entries.
//!
//! 2. Connect to the same Redis the server uses, configured through the same environment.
//!
//! 3. Act as the superadmin, creating it first if the server never booted against this Redis.
//!
//! 4. With `--reset`, run a cycle reset first so last week's votes do not carry over.
//!
//! 5. Sanitize every name into a canonical key. Names that sanitize to nothing are gibberish and skipped.
//!    Names whose key is already on the menu, archived items included, are skipped too.
//!
//! 6. Insert the rest through the catalog so ids, option cleanup and change events behave exactly as
//!    if an admin added them by hand.
//!
//! 7. Publish the change events those inserts raised on the shared Redis channel, so servers relay
//!    them to connected sessions.
//!
//! ## Notes
//! - Running the loader twice with the same file is harmless, the second run skips everything.
//!
//! - Renamed items are not detected. An item whose name changed is inserted as a new item.
use std::{collections::HashSet, fs::read_to_string, path::Path, sync::Arc};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

pub mod models;
pub mod utils;

use canteen_server::{
    broadcast::{ChangeEvent, Subscription},
    config::Config,
    database::{RedisStore, init_redis, publish_event},
    model::{Caller, Role},
    state::State,
};
use models::{MenuEntry, parse_menu};
use utils::{fresh_entries, sanitize};

pub struct Summary {
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Distinct change events raised by the load, in the order they first appeared.
    pub events: Vec<ChangeEvent>,
}

impl Summary {
    fn collect(&mut self, subscription: &mut Subscription) {
        while let Some(event) = subscription.try_recv() {
            if !self.events.contains(&event) {
                self.events.push(event);
            }
        }
    }
}

pub async fn load_menu(path: &Path, reset: bool) -> Result<()> {
    let raw = read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let entries = parse_menu(&raw).with_context(|| format!("parsing {}", path.display()))?;

    println!("Loaded Entries: {}\n", entries.len());

    let config = Config::load()?;
    let mut connection = init_redis(&config.redis_url).await?;
    let store = RedisStore::new(connection.clone());
    let state = State::with_store(config, Arc::new(store));

    let summary = load_into(&state, entries, reset).await?;

    for event in &summary.events {
        let servers = publish_event(&mut connection, *event).await?;
        println!("Published {} to {servers} servers", event.kind());
    }

    if summary.inserted == 0 {
        println!("No new items found. Exiting.");
    } else {
        println!("Total New Items: {}", summary.inserted);
    }
    println!("Skipped: {}", summary.skipped);

    if summary.failed > 0 {
        anyhow::bail!("{} items failed to insert", summary.failed);
    }

    Ok(())
}

pub async fn load_into(state: &State, entries: Vec<MenuEntry>, reset: bool) -> Result<Summary> {
    let root = state.roster.ensure_root(&state.config.root_name).await?;
    let caller = Caller {
        participant: root.id,
        role: Role::Superadmin,
    };
    let mut subscription = state.broadcaster.subscribe();

    let mut summary = Summary {
        inserted: 0,
        skipped: 0,
        failed: 0,
        events: Vec::new(),
    };

    if reset {
        state.admission.reset_cycle(&caller).await?;
        println!("Voting cycle reset");
        summary.collect(&mut subscription);
    }

    let mut known: HashSet<String> = state
        .catalog
        .items(true)
        .await?
        .iter()
        .map(|item| sanitize(&item.name))
        .collect();

    let (fresh, skipped) = fresh_entries(entries, &mut known);
    summary.skipped = skipped;

    let pb = ProgressBar::new(fresh.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("=> "),
    );

    for entry in fresh {
        pb.set_message(format!("Adding {}", entry.name));
        let name = entry.name.clone();

        match state.catalog.add_item(&caller, entry.into()).await {
            Ok(_item) => {
                #[cfg(feature = "verbose")]
                pb.println(format!("New item! {} ({})", _item.name, _item.id));

                summary.inserted += 1;
            }
            Err(e) => {
                pb.println(format!("Failed to add {name}: {e}"));
                summary.failed += 1;
            }
        }

        summary.collect(&mut subscription);
        pb.inc(1);
    }

    pb.finish_with_message("Done");
    Ok(summary)
}
