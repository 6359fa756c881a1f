use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use xform::{Error, ParameterList};

// Many small, short-lived allocations while building and serializing trees.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Applies an XSLT 1.0 stylesheet to an XML or HTML document.
#[derive(Parser, Debug)]
#[command(name = "xform", version)]
struct Args {
    /// The stylesheet to apply.
    stylesheet: PathBuf,

    /// The source document.
    input: PathBuf,

    /// Parse the input as HTML instead of XML.
    #[arg(long)]
    html: bool,

    /// Bind a parameter to an XPath expression, as NAME=EXPRESSION.
    #[arg(long = "param", value_name = "NAME=XPATH")]
    params: Vec<String>,

    /// Bind a parameter to a literal string, as NAME=VALUE.
    #[arg(long = "string-param", value_name = "NAME=VALUE")]
    string_params: Vec<String>,

    /// Read parameters from a JSON object.
    #[arg(long, value_name = "FILE")]
    params_json: Option<PathBuf>,

    /// Write the result here instead of to stdout.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn split_binding(binding: &str) -> Result<(&str, &str), Error> {
    binding
        .split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| Error::InvalidArgument(format!("expected NAME=VALUE, got '{}'", binding)))
}

fn parameters(args: &Args) -> Result<ParameterList, Error> {
    let mut params = match &args.params_json {
        Some(path) => {
            let json = fs::read_to_string(path).map_err(|e| {
                Error::InvalidArgument(format!("cannot read '{}': {}", path.display(), e))
            })?;
            ParameterList::from_json(&json)?
        }
        None => ParameterList::new(),
    };
    for binding in &args.params {
        let (name, expression) = split_binding(binding)?;
        params.push(name, expression);
    }
    for binding in &args.string_params {
        let (name, value) = split_binding(binding)?;
        params.push_string(name, value);
    }
    Ok(params)
}

fn run(args: &Args) -> Result<(), Error> {
    let params = parameters(args)?;
    let stylesheet = xform::read_xslt_file(&args.stylesheet)?;
    let output = if args.html {
        let document = xform::read_html_file(&args.input)?;
        xform::transform(&stylesheet, &document, &params)?
    } else {
        let document = xform::read_xml_file(&args.input)?;
        xform::transform(&stylesheet, &document, &params)?
    };
    match &args.output {
        Some(path) => fs::write(path, output).map_err(|e| {
            Error::InvalidArgument(format!("cannot write '{}': {}", path.display(), e))
        })?,
        None => print!("{}", output),
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    log::debug!("{:?}", args);
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("xform: {}", e);
            ExitCode::FAILURE
        }
    }
}
