//
// main.rs
//
// Command-line entry point for dshl-ls
//

use std::env;

use dshl_ls::backend;

fn print_usage() {
    println!(
        "dshl-ls {}, a shader include language server.",
        env!("CARGO_PKG_VERSION")
    );
    print!(
        r#"
Usage: dshl-ls [OPTIONS]

Available options:

--stdio                      Start the LSP server using stdio transport
--version                    Print the version
--help                       Print this help message

"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let mut use_stdio = false;

    for arg in argv {
        match arg.as_str() {
            "--stdio" => use_stdio = true,
            "--version" => {
                println!("dshl-ls {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("Unknown argument: '{other}'"));
            }
        }
    }

    if !use_stdio {
        print_usage();
        return Ok(());
    }

    env_logger::init();
    log::info!("Starting dshl-ls {}", env!("CARGO_PKG_VERSION"));

    backend::start_lsp().await
}
