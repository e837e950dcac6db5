//
// main.rs
//
// Command-line front end for the project engine
//

use std::env;

use texproject::cli::project_report;

fn print_usage() {
    println!(
        "texproject {}, a LaTeX project dependency tracker.",
        env!("CARGO_PKG_VERSION")
    );
    print!(
        r#"
Usage: texproject <COMMAND> <WORKSPACE> [OPTIONS]

Commands:

report                       Find the root file and print its dependencies
watch                        Like report, then follow file changes until Ctrl-C

Options:

--active FILE                Treat FILE as the focused document
--config FILE                Read settings from a JSON file
--json                       Print the report as JSON
--build CMD [ARGS...]        (watch) Build command for auto-build; the root path is appended
--version                    Print the version
--help                       Print this help message

"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let Some(command) = argv.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "--version" => {
            println!("texproject {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "--help" => {
            print_usage();
            Ok(())
        }
        "report" | "watch" => {
            let args = project_report::parse_args(&mut argv).map_err(|e| anyhow::anyhow!(e))?;
            env_logger::init();
            if command == "watch" {
                project_report::run_watch(&args).await
            } else {
                project_report::run_report(&args).await
            }
        }
        other => Err(anyhow::anyhow!("Unknown argument: '{other}'")),
    }
}
