//! `orchid capability`: inspect how capability calls get answered.

use orchid_core::capability::builtins::register_builtins;
use orchid_core::capability::{split_capability, CapabilityRegistry};
use orchid_core::directory::{CapabilityDirectory, SqliteDirectory};
use orchid_core::EngineConfig;

/// List builtin modules and every record in the persistent directory.
pub async fn list(config: EngineConfig) -> Result<(), String> {
    let registry = CapabilityRegistry::new();
    register_builtins(&registry).await;
    let mut builtins = registry.modules().await;
    builtins.sort();
    println!("Builtin modules: {}", builtins.join(", "));
    println!();

    let directory = open_directory(&config)?;
    let records = directory.list().await.map_err(|e| e.to_string())?;

    if records.is_empty() {
        println!("No capabilities recorded in the directory yet.");
        return Ok(());
    }

    println!("┌──────────────────────────┬────────────────────────────────────┬───────────┬───────┐");
    println!("│ Capability               │ Provider                           │ Generated │ Conf. │");
    println!("├──────────────────────────┼────────────────────────────────────┼───────────┼───────┤");
    for record in &records {
        println!(
            "│ {:<24} │ {:<34} │ {:<9} │ {:<5.2} │",
            truncate(&record.capability, 24),
            truncate(&record.provider, 34),
            if record.auto_generated { "yes" } else { "no" },
            record.confidence,
        );
    }
    println!("└──────────────────────────┴────────────────────────────────────┴───────────┴───────┘");
    Ok(())
}

/// Walk the resolution order for one capability and report the first
/// provider that answers, without invoking anything.
pub async fn resolve(config: EngineConfig, capability: &str) -> Result<(), String> {
    let (module, _) = split_capability(capability);

    let registry = CapabilityRegistry::new();
    register_builtins(&registry).await;
    if registry.is_builtin(&module).await {
        println!(
            "✅ '{}' is answered by the builtin '{}' module",
            capability, module
        );
        return Ok(());
    }

    let directory = open_directory(&config)?;
    if let Some(record) = directory
        .resolve(capability)
        .await
        .map_err(|e| e.to_string())?
    {
        println!("✅ '{}' is recorded in the directory", capability);
        super::print_json(&serde_json::to_value(&record).map_err(|e| e.to_string())?);
        return Ok(());
    }

    let conventional = config.modules_path().join(format!("{}.yaml", module));
    if conventional.exists() {
        println!(
            "✅ '{}' resolves to the module file {}",
            capability,
            conventional.display()
        );
        return Ok(());
    }

    Err(format!(
        "nothing answers for '{}'; a run would attempt synthesis",
        capability
    ))
}

fn open_directory(config: &EngineConfig) -> Result<SqliteDirectory, String> {
    std::fs::create_dir_all(&config.data_dir).map_err(|e| {
        format!(
            "cannot create data dir '{}': {}",
            config.data_dir.display(),
            e
        )
    })?;
    SqliteDirectory::open(&config.data_dir.join("directory.db"))
        .map_err(|e| format!("cannot open capability directory: {}", e))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
