/*
 * Copyright 2022-2025 Crown Copyright
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use agg_state::{ShapeId, StateStreamReader};
use arrow::util::pretty::pretty_format_batches;
use chrono::Local;
use clap::Parser;
use color_eyre::eyre::WrapErr;
use human_panic::setup_panic;
use log::info;
use num_format::{Locale, ToFormattedString};
use owo_colors::OwoColorize;
use std::{fs::File, io::BufReader, io::Write, path::PathBuf};

/// Prints the contents of an aggregation state stream.
///
/// The input is either an exchange payload or a spill file. Each column is listed with
/// its Arrow type and the state shape and format version it carries, followed by the
/// first rows of the stream.
#[derive(Parser, Debug)]
#[command(author, version)]
struct CmdLineArgs {
    /// The state stream file to read
    input: PathBuf,
    /// Maximum number of rows to print
    #[arg(short = 'n', long, default_value = "20")]
    limit: usize,
    /// Only print the columns and their state shapes
    #[arg(short = 's', long)]
    schema_only: bool,
}

fn main() -> color_eyre::Result<()> {
    // Install coloured errors
    color_eyre::install()?;

    // Install human readable panics
    setup_panic!();

    // Install and configure environment logger
    env_logger::builder()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}:{} - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.file().unwrap_or("??"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = CmdLineArgs::parse();

    let file = File::open(&args.input)
        .wrap_err_with(|| format!("Couldn't open {}", args.input.display()))?;
    let reader = StateStreamReader::try_new(BufReader::new(file))
        .wrap_err_with(|| format!("Couldn't read {}", args.input.display()))?;

    println!(
        "{} {} ({} rows)",
        "State stream".bold(),
        args.input.display(),
        reader.expected_rows().to_formatted_string(&Locale::en)
    );
    for field in reader.schema().fields() {
        match ShapeId::from_field(field) {
            Ok(shape) => println!(
                "  {} {} {}",
                field.name().cyan(),
                field.data_type(),
                shape.green()
            ),
            Err(_) => println!(
                "  {} {} {}",
                field.name().cyan(),
                field.data_type(),
                "group key".yellow()
            ),
        }
    }
    if args.schema_only {
        return Ok(());
    }

    let mut shown = Vec::new();
    let mut remaining = args.limit;
    let mut total_rows = 0;
    for batch in reader {
        let batch = batch.wrap_err_with(|| format!("Couldn't read {}", args.input.display()))?;
        total_rows += batch.num_rows();
        if remaining > 0 {
            let rows = remaining.min(batch.num_rows());
            shown.push(batch.slice(0, rows));
            remaining -= rows;
        }
    }
    if !shown.is_empty() {
        println!("{}", pretty_format_batches(&shown)?);
    }
    info!(
        "Read {} rows, printed {}",
        total_rows.to_formatted_string(&Locale::en),
        (args.limit - remaining).to_formatted_string(&Locale::en)
    );
    Ok(())
}
