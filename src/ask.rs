//! `ka ask`: answer one question from the command line.

use anyhow::Result;
use futures_util::StreamExt;
use std::io::Write;

use crate::assistant::Assistant;
use crate::models::SourceRef;

pub async fn run_ask(assistant: &Assistant, question: &str, stream: bool) -> Result<()> {
    let sources = if stream {
        let mut streamed = assistant.ask_stream(question).await?;
        let mut stdout = std::io::stdout();
        while let Some(fragment) = streamed.stream.next().await {
            write!(stdout, "{}", fragment?)?;
            stdout.flush()?;
        }
        println!();
        streamed.sources
    } else {
        let answer = assistant.ask(question).await?;
        println!("{}", answer.answer.trim_end());
        answer.sources
    };

    print_sources(&sources);
    Ok(())
}

fn print_sources(sources: &[SourceRef]) {
    if sources.is_empty() {
        return;
    }
    println!();
    println!("Sources:");
    for (i, s) in sources.iter().enumerate() {
        match s.page {
            Some(page) => println!("  {}. {} (page {}) [{:.2}]", i + 1, s.source, page, s.score),
            None => println!("  {}. {} [{:.2}]", i + 1, s.source, s.score),
        }
    }
}
