//! Look up Wikipedia pages by id or title from the command line.
//!
//! Prints one line per id, in the order given: `id<TAB>title<TAB>abstract`
//! for pages that exist, or `id<TAB>error: ...` for pages that don't.
//! Titles given with `--title` follow, keyed by the title.
//! Handler settings are read from `WIKIPAGE_*` environment variables; log
//! output is controlled by `RUST_LOG`.

use std::{error::Error, sync::Arc, time::Duration};

use clap::Parser;
use futures::future;
use tracing_subscriber::EnvFilter;
use wikipage::{CancellationToken, HandlerConfig, PageId, Registry, WikiPage, WikipediaUpstream};

#[derive(Debug, Parser)]
#[command(name = "wikipage", version, about = "Look up Wikipedia pages by page id")]
struct Args {
    /// Language edition to query
    #[arg(short, long, default_value = "en")]
    lang: String,

    /// Give up on a page after this many seconds
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    /// Page titles to look up, one per flag
    #[arg(long = "title", value_name = "TITLE")]
    titles: Vec<String>,

    /// Page ids to look up
    #[arg(required_unless_present = "titles")]
    ids: Vec<PageId>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = HandlerConfig::from_env()?;
    let upstream = Arc::new(WikipediaUpstream::new()?);
    let registry = Registry::new(upstream, config)?;
    let handler = registry.handler(&args.lang)?;

    let timeout = Duration::from_secs(args.timeout);
    let lookups = args.ids.iter().map(|&id| {
        let handler = handler.clone();
        async move { (id, handler.resolve_timeout(id, timeout).await) }
    });

    let titles = args.titles.iter().map(|title| {
        let handler = handler.clone();
        async move {
            let cancel = CancellationToken::new();
            let lookup = handler.resolve_title(&cancel, title);
            let result = match tokio::time::timeout(timeout, lookup).await {
                Ok(result) => result,
                Err(_) => Err(wikipage::Error::Cancelled),
            };
            (title, result)
        }
    });

    let (ids, titles) = future::join(future::join_all(lookups), future::join_all(titles)).await;
    for (id, result) in ids {
        print_result(&id, result);
    }
    for (title, result) in titles {
        print_result(title, result);
    }

    Ok(())
}

fn print_result(key: &dyn std::fmt::Display, result: Result<WikiPage, wikipage::Error>) {
    match result {
        Ok(page) => println!("{}\t{}\t{}", key, page.title, one_line(&page.abstract_text)),
        Err(err) => println!("{}\terror: {}", key, report(&err)),
    }
}

/// An error and its causes, outermost first.
fn report(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Introductions span several paragraphs; keep each page on its own line.
fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
