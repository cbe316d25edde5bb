//! `orchid validate`: parse and check an agent document without running it.

use orchid_core::document::AgentDocument;

pub async fn run(file: &str) -> Result<(), String> {
    let text =
        std::fs::read_to_string(file).map_err(|e| format!("cannot read '{}': {}", file, e))?;
    let document = AgentDocument::from_str(&text)
        .map_err(|e| format!("'{}' is not a valid agent document: {}", file, e))?;

    println!("✅ Document '{}' is valid", document.identity.id);
    if let Some(intent) = &document.identity.intent {
        println!("   Intent: {}", intent);
    }
    if let Some(version) = &document.identity.version {
        println!("   Version: {}", version);
    }

    println!("   Operations: {}", document.operations.len());
    let mut names: Vec<&String> = document.operations.keys().collect();
    names.sort();
    for name in names {
        println!("   - {} ({} step(s))", name, document.operations[name].len());
    }

    if let Some(concern) = &document.concern {
        println!(
            "   Concern: if `{}` then {} step(s)",
            concern.condition,
            concern.action.len()
        );
    }

    Ok(())
}
