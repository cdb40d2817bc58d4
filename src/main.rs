mod cli;

use clap::Parser;
use serde_json::Value;

use cardvault::types::{
    AnnotationPatch, AnnotationValue, AttrValueType, AttributeDefinition, CardFilters, CardSet,
    CardTable, PageRequest, SortSpec, StatementOutcome,
};
use cardvault::{config, engine, sync, Catalog};

use crate::cli::{Cli, Command};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let workspace = config::workspace_dir(cli.workspace.as_deref());
    std::fs::create_dir_all(&workspace)?;
    let file_config = config::load_file_config(&config::config_file_path(&workspace));
    let paths = config::snapshot_paths(&workspace, &file_config);
    let cache_db = config::cache_db_path(&workspace, &file_config);
    let catalog = match Catalog::open(&paths, &cache_db) {
        Ok(catalog) => catalog,
        Err(e) => {
            eprintln!("cardvault: startup failed: {e}");
            std::process::exit(2);
        }
    };

    match cli.command {
        Command::List {
            source,
            name,
            supertype,
            rarity,
            set_id,
            card_type,
            owned,
            not_owned,
            hp_min,
            hp_max,
            price_min,
            price_max,
            region,
            generation,
            evolution_line,
            sort,
            desc,
            page,
            page_size,
            json,
        } => {
            let filters = CardFilters {
                source,
                name,
                supertype,
                rarity,
                set_id,
                card_type,
                owned: if owned {
                    Some(true)
                } else if not_owned {
                    Some(false)
                } else {
                    None
                },
                hp_min,
                hp_max,
                price_min,
                price_max,
                region,
                generation,
                evolution_line,
            };
            let sort = SortSpec {
                field: sort,
                descending: desc,
            };
            let page = PageRequest::parse_lenient(Some(&page), Some(&page_size));
            let result = catalog.list_cards(&filters, &sort, page)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                for card in &result.cards {
                    let owned_mark = card
                        .annotations
                        .get("owned")
                        .and_then(AnnotationValue::as_bool)
                        .unwrap_or(false);
                    println!(
                        "{:<14} {:<26} {:<8} {:<10} {:<14} {:>8} {}",
                        card.id,
                        card.name,
                        card.source,
                        card.set_id.as_deref().unwrap_or("-"),
                        card.rarity.as_deref().unwrap_or("-"),
                        card.market_price
                            .map(|p| format!("{p:.2}"))
                            .unwrap_or_else(|| "-".into()),
                        if owned_mark { "owned" } else { "" },
                    );
                }
                println!(
                    "page {} of {} total card(s)",
                    page.page, result.total
                );
            }
        }

        Command::Show { id, source, json } => {
            let card = catalog.get_card(&id, source.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&card)?);
            } else {
                println!("{} — {} ({})", card.id, card.name, card.source);
                if let Some(set_name) = &card.set_name {
                    println!("  set:    {} ({})", set_name, card.set_id.as_deref().unwrap_or("-"));
                }
                if let Some(rarity) = &card.rarity {
                    println!("  rarity: {rarity}");
                }
                if let Some(price) = card.market_price {
                    println!("  price:  {price:.2}");
                }
                if let Some(species) = &card.species {
                    println!(
                        "  species: #{} {} ({})",
                        species.pokedex_number,
                        species.name,
                        species.region.as_deref().unwrap_or("-")
                    );
                }
                if !card.annotations.is_empty() {
                    println!("  annotations:");
                    for (key, value) in &card.annotations {
                        println!("    {key} = {}", engine::annotation_value_to_json(value));
                    }
                }
            }
        }

        Command::Annotate {
            id,
            source,
            assignments,
            removals,
            json,
        } => {
            let mut patch = AnnotationPatch::new();
            for assignment in &assignments {
                let (key, value) = assignment.split_once('=').ok_or_else(|| {
                    format!("bad assignment '{assignment}' (expected key=value)")
                })?;
                patch.insert(key.trim().to_string(), Some(parse_annotation_value(value)));
            }
            for key in &removals {
                patch.insert(key.trim().to_string(), None);
            }
            if patch.is_empty() {
                return Err("nothing to do: pass --set key=value or --unset key".into());
            }
            let merged = catalog.patch_annotations(&id, source.as_deref(), &patch)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&merged)?);
            } else {
                println!("{id}: {} annotation key(s)", merged.len());
            }
        }

        Command::Attrs { json } => {
            let defs = catalog.list_attribute_definitions()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&defs)?);
            } else {
                for def in &defs {
                    let kind = serde_json::to_value(def.value_type)?;
                    println!(
                        "{:<16} {:<16} {:<8} {}{}",
                        def.key,
                        def.label,
                        kind.as_str().unwrap_or("text"),
                        if def.is_builtin { "builtin" } else { "custom" },
                        if def.options.is_empty() {
                            String::new()
                        } else {
                            format!("  [{}]", def.options.join(", "))
                        },
                    );
                }
            }
        }

        Command::AttrAdd {
            key,
            label,
            value_type,
            options,
        } => {
            let value_type = match value_type.as_str() {
                "text" => AttrValueType::Text,
                "number" => AttrValueType::Number,
                "boolean" => AttrValueType::Boolean,
                "select" => AttrValueType::Select,
                other => return Err(format!("unknown value type '{other}'").into()),
            };
            let created = catalog.create_attribute_definition(&AttributeDefinition {
                key: key.clone(),
                label: label.unwrap_or_else(|| key.clone()),
                value_type,
                options,
                default_value: None,
                is_builtin: false,
                sort_order: 0,
            })?;
            println!("Created attribute '{}' (sort order {})", created.key, created.sort_order);
        }

        Command::AttrRm { key } => {
            catalog.delete_attribute_definition(&key)?;
            println!("Deleted attribute '{key}'");
        }

        Command::AddCard { file, inline, json } => {
            let raw = match (file, inline) {
                (Some(path), _) => std::fs::read_to_string(path)?,
                (None, Some(inline)) => inline,
                (None, None) => return Err("pass --file or --inline".into()),
            };
            let Value::Object(record) = serde_json::from_str(&raw)? else {
                return Err("custom card record must be a JSON object".into());
            };
            let card = catalog.add_card(&record)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&card)?);
            } else {
                println!("Added {} ({}) to {}", card.id, card.name, card.table);
            }
        }

        Command::Delete { ids } => {
            if ids.is_empty() {
                return Err("pass at least one card id".into());
            }
            let deleted = catalog.delete_cards(&ids)?;
            println!("Deleted {deleted} card(s)");
        }

        Command::Sets { source, json } => {
            let sets = catalog.list_sets(source.as_deref())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sets)?);
            } else {
                for set in &sets {
                    println!(
                        "{:<14} {:<30} {:<12} {}",
                        set.id,
                        set.name,
                        set.release_date.as_deref().unwrap_or("-"),
                        if set.is_custom { "custom" } else { "" },
                    );
                }
            }
        }

        Command::AddSet {
            table,
            id,
            name,
            series,
            release_date,
        } => {
            let table = CardTable::from_hint(&table)
                .ok_or_else(|| format!("unknown table '{table}' (expected tcg or pocket)"))?;
            let created = catalog.add_set(
                table,
                &CardSet {
                    id,
                    name,
                    series,
                    release_date,
                    is_custom: true,
                    table: None,
                },
            )?;
            println!("Added set '{}' to {}", created.id, table.sets_table_name());
        }

        Command::Options { source } => {
            let options = catalog.list_filter_options(source.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&options)?);
        }

        Command::Export { out } => {
            let snapshot = catalog.export_snapshot()?;
            let revision = sync::snapshot_revision(&snapshot)?;
            let body = serde_json::to_string_pretty(&snapshot)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, body)?;
                    println!("Wrote {} (revision {revision})", path.display());
                }
                None => {
                    println!("{body}");
                    eprintln!("revision {revision}");
                }
            }
        }

        Command::Sql { statement, json } => {
            let outcome = catalog.run_statement(&statement)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                match outcome {
                    StatementOutcome::Rows {
                        columns,
                        rows,
                        row_count,
                    } => {
                        println!("{}", columns.join(" | "));
                        for row in rows {
                            let cells: Vec<String> = row
                                .iter()
                                .map(|v| match v {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                })
                                .collect();
                            println!("{}", cells.join(" | "));
                        }
                        println!("{row_count} row(s)");
                    }
                    StatementOutcome::Ack { rows_affected } => {
                        println!("OK, {rows_affected} row(s) affected");
                    }
                }
            }
        }

        Command::Stats { json } => {
            let stats = catalog.collection_stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{} card(s), {} owned", stats.total, stats.owned);
                for (source, count) in &stats.by_source {
                    println!("  {source:<10} {count}");
                }
            }
        }
    }
    Ok(())
}

/// CLI value syntax: true/false become booleans, `[a, b, c]` becomes a
/// list, everything else is text.
fn parse_annotation_value(raw: &str) -> AnnotationValue {
    let trimmed = raw.trim();
    match trimmed {
        "true" => AnnotationValue::Bool(true),
        "false" => AnnotationValue::Bool(false),
        _ => {
            if let Some(inner) = trimmed
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
            {
                AnnotationValue::List(
                    inner
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect(),
                )
            } else {
                AnnotationValue::Text(trimmed.to_string())
            }
        }
    }
}
