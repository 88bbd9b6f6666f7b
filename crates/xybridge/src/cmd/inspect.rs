use std::fs;

use xybridge_layout::Layout;

use crate::cmd::InspectArgs;
use crate::exit::{config_error, io_error, CliResult, SUCCESS};
use crate::output::{print_layout, OutputFormat};

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let text = fs::read_to_string(&args.config)
        .map_err(|err| io_error(&format!("failed reading {}", args.config.display()), err))?;
    let layout = Layout::parse(&text).map_err(|err| config_error("invalid configuration", err))?;

    print_layout(&layout, format);
    Ok(SUCCESS)
}
