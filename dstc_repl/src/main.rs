use std::{fs, path::PathBuf};

use anyhow::Context;
use clap::Parser;
use codesnake::{Block, CodeWidth, Label, LineIndex};
use dstc::{
    lexer::{LexerError, Span, Token},
    CompileOptions, Compiler, World,
};
use yansi::Paint;

/// Compiles forms to register bytecode and prints the listing.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Files to compile in order; with none, read forms from a prompt
    files: Vec<PathBuf>,

    /// Leave calls to arithmetic builtins alone
    #[arg(long)]
    no_optimize: bool,

    /// Deepest form nesting to compile
    #[arg(long, default_value_t = CompileOptions::default().recursion_limit)]
    recursion_limit: usize,

    /// Show how each input lexes instead of compiling it
    #[arg(long)]
    tokens: bool,
}

fn token_block<'a>(
    idx: &'a LineIndex,
    tokens: impl IntoIterator<Item = (Result<Token, LexerError>, Span)>,
) -> Option<Block<&'a str, String>> {
    Block::new(
        idx,
        tokens.into_iter().map(|(tok, range)| {
            let text = match &tok {
                Ok(tok) => format!("{tok:?}").green().to_string(),
                Err(err) => err.to_string().red().to_string(),
            };
            Label::new(range)
                .with_text(text)
                .with_style(move |s| match tok {
                    Ok(Token::Symbol(_)) => s.blue().to_string(),
                    Ok(Token::Keyword(_)) => s.yellow().to_string(),
                    Ok(Token::String(_)) => s.cyan().to_string(),
                    Ok(_) => s,
                    Err(_) => s.red().to_string(),
                })
        }),
    )
}

fn error_block<'a>(idx: &'a LineIndex, span: Span, message: String) -> Option<Block<&'a str, String>> {
    Block::new(
        idx,
        [Label::new(span)
            .with_text(message.red().to_string())
            .with_style(|s| s.red().to_string())],
    )
}

fn print_block(name: &str, block: Option<Block<&str, String>>) {
    let Some(block) = block else {
        return;
    };
    let block = block.map_code(|c| CodeWidth::new(c, c.len()));
    println!("{}[{name}]", block.prologue());
    print!("{block}");
    println!("{}", block.epilogue());
}

fn show_tokens(name: &str, source: &str) {
    let idx = LineIndex::new(source);
    let tokens = Token::lexer(source)
        .spanned()
        .filter(|(tok, _)| !tok.as_ref().is_ok_and(Token::is_trivia));
    print_block(name, token_block(&idx, tokens));
}

/// Compiles every form of `source`, printing listings until the first
/// error. Returns whether everything compiled.
fn compile_source(world: &mut World, options: &CompileOptions, name: &str, source: &str) -> bool {
    let idx = LineIndex::new(source);
    let forms = match world.read(source) {
        Ok(forms) => forms,
        Err(err) => {
            print_block(name, error_block(&idx, err.span(), format!("read error: {err}")));
            return false;
        }
    };
    log::debug!("read {} forms from {name}", forms.len());

    for parsed in &forms {
        let compiled = Compiler::new(world)
            .with_options(options.clone())
            .compile(&parsed.form, &parsed.map);
        match compiled {
            Ok(def) => print!("{}", def.disassemble(world.interner())),
            Err(err) => {
                print_block(name, error_block(&idx, err.span.clone(), err.to_string()));
                return false;
            }
        }
    }
    true
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let options = CompileOptions {
        recursion_limit: args.recursion_limit,
        optimize: !args.no_optimize,
    };
    let mut world = World::with_builtins();

    if !args.files.is_empty() {
        let mut failed = 0;
        for path in &args.files {
            let source = fs::read_to_string(path)
                .with_context(|| format!("could not read {}", path.display()))?;
            let name = path.display().to_string();
            if args.tokens {
                show_tokens(&name, &source);
            } else if !compile_source(&mut world, &options, &name, &source) {
                failed += 1;
            }
        }
        anyhow::ensure!(failed == 0, "{failed} file(s) failed to compile");
        return Ok(());
    }

    let mut readline = rustyline::DefaultEditor::new()?;
    while let Ok(input) = readline.readline(">> ") {
        if input.trim().is_empty() {
            continue;
        }
        let _ = readline.add_history_entry(input.as_str());
        if args.tokens {
            show_tokens("repl", &input);
        } else {
            compile_source(&mut world, &options, "repl", &input);
        }
    }

    Ok(())
}
