//! vibestore - inspect and poke at a page file and its write-ahead log

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};
use std::path::PathBuf;
use vibestore::storage::{PageCache, PageId, StorageConfig, WriteAheadLog, PAGE_SIZE};

/// vibestore - storage substrate tooling
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data directory
    #[arg(short = 'D', long, default_value = "./vibestore_data")]
    data_dir: PathBuf,

    /// Base name of the `.db` and `.log` files
    #[arg(short, long, default_value = "vibestore")]
    name: String,

    /// Page cache memory budget in bytes
    #[arg(short, long, default_value_t = 64 * PAGE_SIZE as u64)]
    memory: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an empty page file and log
    Init,
    /// Append one record to the log
    Append { data: String },
    /// Recover the log and print every record
    Dump,
    /// Print the number of pages in the page file
    Pages,
    /// Allocate a page seeded with the given text and flush it
    NewPage { data: String },
    /// Print the first bytes of a page
    ShowPage {
        pgno: u32,
        #[arg(short, long, default_value = "64")]
        bytes: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let config = StorageConfig {
        data_dir: args.data_dir,
        name: args.name,
        memory_budget: args.memory,
    };

    match args.command {
        Command::Init => {
            std::fs::create_dir_all(&config.data_dir)
                .context("Failed to create data directory")?;
            PageCache::create(config.page_file_base(), config.memory_budget)
                .context("Failed to create page file")?
                .close();
            WriteAheadLog::create(config.log_file_base())
                .context("Failed to create log file")?
                .close();
            println!("Initialized {}", config.data_dir.display());
        }
        Command::Append { data } => {
            let wal = WriteAheadLog::open(config.log_file_base()).context("Failed to open log")?;
            wal.log(data.as_bytes());
            println!("Appended {} bytes, log is now {} bytes", data.len(), wal.len());
            wal.close();
        }
        Command::Dump => {
            let wal = WriteAheadLog::open(config.log_file_base()).context("Failed to open log")?;
            let mut index = 0;
            while let Some(record) = wal.next() {
                println!(
                    "#{:<6} {:>8} bytes  {}",
                    index,
                    record.len(),
                    String::from_utf8_lossy(&record)
                );
                index += 1;
            }
            println!("{} records, checksum {:#010x}", index, wal.x_checksum());
            wal.close();
        }
        Command::Pages => {
            let pc = open_pages(&config)?;
            println!(
                "{} pages, cache holds up to {} pages",
                pc.page_count(),
                config.max_pages()
            );
            pc.close();
        }
        Command::NewPage { data } => {
            let pc = open_pages(&config)?;
            let page = pc.new_page(data.as_bytes()).context("Failed to allocate page")?;
            pc.flush_page(&page);
            pc.release(&page);
            println!("Allocated page {}", page.id().0);
            pc.close();
        }
        Command::ShowPage { pgno, bytes } => {
            let pc = open_pages(&config)?;
            let page = pc
                .get_page(PageId(pgno))
                .with_context(|| format!("Failed to read page {}", pgno))?;
            let shown = bytes.min(PAGE_SIZE);
            for (i, chunk) in page.data()[..shown].chunks(16).enumerate() {
                let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
                println!("{:06x}  {}", i * 16, hex.join(" "));
            }
            pc.release(&page);
            pc.close();
        }
    }

    Ok(())
}

fn open_pages(config: &StorageConfig) -> Result<PageCache> {
    PageCache::open(config.page_file_base(), config.memory_budget)
        .context("Failed to open page file")
}
