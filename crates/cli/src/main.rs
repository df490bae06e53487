#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use kindex_core::{split_key, Everything, Labels};
use kindex_lister::{Lister, ListerError};
use kindex_store::Cache;
use kube::core::{ApiResource, DynamicObject, Expression, GroupVersionKind, Selector as LabelSelector};
use kube::ResourceExt;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "kindexctl", version, about = "Inspect a Kubernetes object dump through kindex listers")]
struct Cli {
    /// Object dump: output of `kubectl get -o json` or a JSON array of objects
    #[arg(short = 'f', long = "file", env = "KINDEX_FILE")]
    file: PathBuf,

    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace (default: all namespaces)
    #[arg(short = 'n', long = "ns", global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List objects of a kind
    Ls {
        /// GVK key, e.g. "v1/ConfigMap" or "apps/v1/Deployment"
        gvk: String,
        /// Label selector, e.g. "app=web,tier!=frontend,canary,!legacy"
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
    },
    /// Get one object by name (or namespace/name)
    Get {
        /// GVK key, e.g. "v1/ConfigMap" or "apps/v1/Deployment"
        gvk: String,
        name: String,
    },
}

fn init_tracing() {
    let env = std::env::var("KINDEX_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn parse_gvk(key: &str) -> Result<ApiResource> {
    let parts: Vec<&str> = key.split('/').collect();
    let gvk = match parts.as_slice() {
        [version, kind] => GroupVersionKind::gvk("", version, kind),
        [group, version, kind] => GroupVersionKind::gvk(group, version, kind),
        _ => bail!("invalid gvk key: {} (expect v1/Kind or group/v1/Kind)", key),
    };
    Ok(ApiResource::from_gvk(&gvk))
}

fn parse_term(term: &str) -> Result<Expression> {
    let valid = |key: &str| -> Result<String> {
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            bail!("invalid selector term {:?}", term);
        }
        Ok(key.to_string())
    };
    Ok(if let Some((k, v)) = term.split_once("!=") {
        Expression::NotEqual(valid(k)?, v.trim().to_string())
    } else if let Some((k, v)) = term.split_once("==").or_else(|| term.split_once('=')) {
        Expression::Equal(valid(k)?, v.trim().to_string())
    } else if let Some(k) = term.strip_prefix('!') {
        Expression::DoesNotExist(valid(k)?)
    } else {
        Expression::Exists(valid(term)?)
    })
}

/// Parse `k=v`, `k==v`, `k!=v`, `k` and `!k` terms; `None` when no terms are given.
fn parse_selector(s: &str) -> Result<Option<LabelSelector>> {
    let terms = s.split(',').map(str::trim).filter(|term| !term.is_empty()).map(parse_term).collect::<Result<Vec<_>>>()?;
    Ok(if terms.is_empty() { None } else { Some(terms.into_iter().collect()) })
}

/// Read the dump and keep objects of kind `ar`. Objects without type info are kept.
fn load_objects(path: &Path, ar: &ApiResource) -> Result<Vec<DynamicObject>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let doc: serde_json::Value = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    let items = match doc {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("items") {
            Some(serde_json::Value::Array(items)) => items,
            _ => vec![serde_json::Value::Object(map)],
        },
        _ => bail!("{}: expected a JSON object or array", path.display()),
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let obj: DynamicObject = serde_json::from_value(item).with_context(|| format!("decoding item #{}", i))?;
        let same_kind = obj.types.as_ref().map(|t| t.api_version == ar.api_version && t.kind == ar.kind).unwrap_or(true);
        if same_kind {
            out.push(obj);
        }
    }
    Ok(out)
}

/// Load a dump as one full relist so every object lands in a single snapshot.
fn populate(objects: Vec<DynamicObject>) -> Arc<Cache<DynamicObject>> {
    let cache = Arc::new(Cache::new());
    let loaded = objects.len();
    cache.replace(objects.into_iter().map(Arc::new).collect());
    debug!(loaded, objects = cache.len(), epoch = cache.epoch(), "cache populated");
    cache
}

fn render_labels(labels: &Labels) -> String {
    if labels.is_empty() {
        return "<none>".to_string();
    }
    labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join(",")
}

fn print_rows(items: &[Arc<DynamicObject>]) {
    println!("{:<20} {:<40} LABELS", "NAMESPACE", "NAME");
    for o in items {
        let ns = o.metadata.namespace.as_deref().unwrap_or("-");
        println!("{:<20} {:<40} {}", ns, o.name_any(), render_labels(o.labels()));
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ls { gvk, selector } => {
            let ar = parse_gvk(&gvk)?;
            let ns = cli.namespace.as_deref();
            info!(gvk = %gvk, ns = ?ns, "ls invoked");
            let cache = populate(load_objects(&cli.file, &ar)?);
            let lister = Lister::<DynamicObject>::new_with(cache, &ar);

            let mut items = match selector.as_deref().map(parse_selector).transpose()?.flatten() {
                Some(sel) => {
                    debug!(selector = ?sel, "label selector");
                    match ns {
                        Some(ns) => lister.namespaced(ns).list(&sel)?,
                        None => lister.list(&sel)?,
                    }
                }
                None => match ns {
                    Some(ns) => lister.namespaced(ns).list(&Everything)?,
                    None => lister.list(&Everything)?,
                },
            };
            // listers do not order results
            items.sort_by(|a, b| (a.namespace(), a.name_any()).cmp(&(b.namespace(), b.name_any())));

            match cli.output {
                Output::Human => print_rows(&items),
                Output::Json => {
                    let objs: Vec<&DynamicObject> = items.iter().map(|o| o.as_ref()).collect();
                    println!("{}", serde_json::to_string_pretty(&objs)?);
                }
            }
        }
        Commands::Get { gvk, name } => {
            let ar = parse_gvk(&gvk)?;
            let (key_ns, name) = split_key(&name)?;
            let ns = key_ns.or(cli.namespace.as_deref());
            info!(gvk = %gvk, ns = ?ns, name, "get invoked");
            let cache = populate(load_objects(&cli.file, &ar)?);
            let lister = Lister::<DynamicObject>::new_with(cache, &ar);

            let res = match ns {
                Some(ns) => lister.namespaced(ns).get(name),
                None => lister.get(name),
            };
            let obj = match res {
                Ok(obj) => obj,
                Err(e @ ListerError::NotFound { .. }) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
                Err(e) => return Err(e.into()),
            };
            match cli.output {
                Output::Human => print_rows(std::slice::from_ref(&obj)),
                Output::Json => println!("{}", serde_json::to_string_pretty(&*obj)?),
            }
        }
    }
    Ok(())
}
