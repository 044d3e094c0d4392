use std::path::PathBuf;

use binwat::watcom::{MasterDebugHeader, WatcomDebugInfo};
use clap::Parser;


#[derive(Parser)]
enum ProgMode {
    /// Decodes only the master debug header at the end of the file.
    Header(InputFileOnlyArgs),

    /// Lists the modules named by the debugging information.
    Modules(InputFileOnlyArgs),

    /// Lists the global symbol table.
    Globals(InputFileOnlyArgs),

    /// Decodes the complete debugging region and prints it as JSON.
    Dump(InputFileOnlyArgs),
}

#[derive(Parser)]
struct InputFileOnlyArgs {
    pub input_file: PathBuf,
}


fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mode = ProgMode::parse();
    match mode {
        ProgMode::Header(args) => {
            let file = std::fs::read(&args.input_file)
                .expect("failed to read input file");
            let header = MasterDebugHeader::read(&file)
                .expect("failed to read master debug header");
            println!("{:#?}", header);
        },
        ProgMode::Modules(args) => {
            let file = std::fs::read(&args.input_file)
                .expect("failed to read input file");
            let info = WatcomDebugInfo::parse(&file)
                .expect("failed to decode debugging information");
            for module in &info.debugging_region.modules {
                println!("{}: {}", module.module_index, module.name);
            }
        },
        ProgMode::Globals(args) => {
            let file = std::fs::read(&args.input_file)
                .expect("failed to read input file");
            let info = WatcomDebugInfo::parse(&file)
                .expect("failed to decode debugging information");
            for symbol in &info.debugging_region.global_symbols {
                println!(
                    "{:04X}:{:08X} {:?} {}",
                    symbol.address_segment, symbol.address_offset, symbol.kind, symbol.name,
                );
            }
        },
        ProgMode::Dump(args) => {
            let file = std::fs::read(&args.input_file)
                .expect("failed to read input file");
            let info = WatcomDebugInfo::parse(&file)
                .expect("failed to decode debugging information");
            let json = serde_json::to_string_pretty(&info)
                .expect("failed to serialize debugging information");
            println!("{}", json);
        },
    }
}
