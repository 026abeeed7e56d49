use chanlink_schema::SchemaRegistry;

use crate::cmd::SchemaArgs;
use crate::exit::{schema_error, CliResult, SUCCESS};
use crate::output::{print_document, OutputFormat};

/// Load a document, check every channel entry, and print it normalized.
pub fn run(args: SchemaArgs, format: OutputFormat) -> CliResult<i32> {
    let registry = SchemaRegistry::from_file(&args.file)
        .map_err(|err| schema_error("schema load failed", err))?;
    tracing::debug!(channels = registry.len(), "schema document loaded");
    print_document(&registry.document(), format);
    Ok(SUCCESS)
}
