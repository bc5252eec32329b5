#![forbid(unsafe_code)]
//! Interactive shell over a chainfs image.
//!
//! The image is read whole at startup (or synthesised when the file does
//! not exist yet), commands mutate the in-memory engine, and the image
//! is written back whole on `quit` or end of input. Command failures are
//! printed and the session continues.

use anyhow::{Context, Result, bail};
use chainfs_core::{FileSystem, InfoReport, Node, PathSpec, split_path};
use clap::Parser;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chainfs", about = "chainfs — single-image file system shell")]
struct Cli {
    /// Path to the file-system image; created when missing.
    image: PathBuf,

    /// Byte budget for a newly created image. Without it, a missing
    /// image prompts for the size interactively.
    #[arg(long)]
    create_size: Option<u64>,

    /// Emit `info` output as JSON.
    #[arg(long)]
    json: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let stdin = std::io::stdin();
    let mut input = stdin.lock();

    let mut fs = open_or_create(&cli.image, cli.create_size, &mut input)
        .with_context(|| format!("failed to open image {}", cli.image.display()))?;

    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line).context("read command")? == 0 {
            break; // end of input behaves like quit
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() {
            continue;
        }
        if trimmed.trim() == "quit" {
            break;
        }

        if let Err(error) = dispatch(&mut fs, trimmed, cli.json) {
            eprintln!("{error:#}");
        }
    }

    chainfs_image::store_image_file(&cli.image, fs.image())
        .with_context(|| format!("failed to write image {}", cli.image.display()))?;
    Ok(())
}

/// Load the image, or synthesise a fresh one when the file is missing.
fn open_or_create(
    path: &Path,
    create_size: Option<u64>,
    input: &mut impl BufRead,
) -> Result<FileSystem> {
    if path.exists() {
        return Ok(FileSystem::new(chainfs_image::load_image_file(path)?));
    }

    let budget = match create_size {
        Some(bytes) => bytes,
        None => {
            print!("Specify the file system size in bytes: ");
            std::io::stdout().flush().context("flush prompt")?;
            let mut answer = String::new();
            input.read_line(&mut answer).context("read size")?;
            answer
                .trim()
                .parse::<u64>()
                .context("the size must be a positive integer")?
        }
    };

    let fs = FileSystem::create(budget)?;
    chainfs_image::store_image_file(path, fs.image())?;
    Ok(fs)
}

/// Run one command line against the engine.
fn dispatch(fs: &mut FileSystem, line: &str, json: bool) -> Result<()> {
    let (command, rest) = split_token(line);
    let Some(command) = command else {
        return Ok(());
    };

    match command {
        "touch" => {
            let spec = leaf_path(rest)?;
            fs.touch(&spec.parent_refs(), &spec.leaf)?;
        }
        "mkdir" => {
            let spec = leaf_path(rest)?;
            fs.mkdir(&spec.parent_refs(), &spec.leaf)?;
        }
        "echo" => {
            let (target, message) = split_token(rest);
            let spec = leaf_path(target.unwrap_or_default())?;
            fs.write(&spec.parent_refs(), &spec.leaf, message.as_bytes())?;
        }
        "cat" => {
            let spec = split_path(first_token(rest)?)?;
            match fs.open(&spec.parent_refs(), &spec.leaf)? {
                Node::File { content } => {
                    let mut out = std::io::stdout().lock();
                    out.write_all(&content).context("write content")?;
                    out.write_all(b"\n").context("write content")?;
                }
                Node::Directory { entries } => {
                    for entry in entries {
                        println!("{}", entry.name_str());
                    }
                }
            }
        }
        "erase" => {
            let spec = leaf_path(rest)?;
            fs.erase(&spec.parent_refs(), &spec.leaf)?;
        }
        "cut" => {
            let (target, count) = split_token(rest);
            let spec = leaf_path(target.unwrap_or_default())?;
            let count: usize = count
                .trim()
                .parse()
                .context("cut needs a byte count, e.g. `cut notes 12`")?;
            fs.cut(&spec.parent_refs(), &spec.leaf, count)?;
        }
        "link" => {
            let (target, link_name) = split_token(rest);
            let src = leaf_path(target.unwrap_or_default())?;
            let dst = leaf_path(link_name.trim())?;
            fs.link(
                &src.parent_refs(),
                &src.leaf,
                &dst.parent_refs(),
                &dst.leaf,
            )?;
        }
        "copy" => {
            let (target, host) = split_token(rest);
            let spec = leaf_path(target.unwrap_or_default())?;
            let host = first_token(host)?;
            let content = std::fs::read(host)
                .with_context(|| format!("unable to open {host} to copy from"))?;
            fs.write(&spec.parent_refs(), &spec.leaf, &content)?;
        }
        "info" => {
            let target = first_token(rest)?;
            print_info(fs, target, json)?;
        }
        "get" => {
            let (target, host) = split_token(rest);
            let spec = split_path(target.unwrap_or_default())?;
            let host = first_token(host)?;
            let content = fs.read(&spec.parent_refs(), &spec.leaf)?;
            std::fs::write(host, content)
                .with_context(|| format!("unable to write {host}"))?;
        }
        other => bail!("unrecognised command {other:?}"),
    }

    Ok(())
}

fn print_info(fs: &mut FileSystem, target: &str, json: bool) -> Result<()> {
    // The allocator keywords shadow root entries of the same name.
    if target == "memory" || target == "inodes" {
        let report = fs.allocator_info();
        if json {
            println!("{}", serde_json::to_string_pretty(&report).context("serialize report")?);
        } else if target == "memory" {
            println!(
                "Blocks in total: {}. Free blocks: {}",
                report.blocks.total, report.blocks.free
            );
        } else {
            println!(
                "Inodes in total: {}. Free inodes: {}",
                report.inodes.total, report.inodes.free
            );
        }
        return Ok(());
    }

    let spec = split_path(target)?;
    let report = fs.info(&spec.parent_refs(), &spec.leaf)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report).context("serialize report")?);
        return Ok(());
    }

    match report {
        InfoReport::File { size } => println!("File size: {size} bytes"),
        InfoReport::Directory { size, entries } => {
            println!("Dir size: {size} bytes");
            if !entries.is_empty() {
                println!("Inner files and directories info:");
                for entry in entries {
                    println!("{} ---> {} bytes", entry.name, entry.size);
                }
            }
        }
    }
    Ok(())
}

/// First whitespace-separated token and the remainder after it.
fn split_token(line: &str) -> (Option<&str>, &str) {
    let line = line.trim_start();
    if line.is_empty() {
        return (None, "");
    }
    match line.split_once(char::is_whitespace) {
        Some((token, rest)) => (Some(token), rest),
        None => (Some(line), ""),
    }
}

fn first_token(rest: &str) -> Result<&str> {
    match split_token(rest).0 {
        Some(token) => Ok(token),
        None => bail!("missing argument"),
    }
}

/// Split a path argument for a mutating command; the root itself is not
/// a valid target there.
fn leaf_path(raw: &str) -> Result<PathSpec> {
    let spec = split_path(first_token(raw)?)?;
    if spec.leaf == "/" {
        bail!("the root directory cannot be the target");
    }
    Ok(spec)
}
