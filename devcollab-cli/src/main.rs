//! devcollab: terminal client for DevCollab
//!
//! Talks to GitHub with the provider token of the current session and joins
//! project chat rooms over the configured realtime backend.
//!
//! # Subcommands
//! - `whoami`                                     signed-in identity
//! - `repos [--json]`                             every repository of the user
//! - `ls <repo> [path] [--owner]`                 directory listing
//! - `cat <repo> <path> [--owner]`                print a file
//! - `edit <repo> <path> --from <file> -m <msg>`  commit a new file body
//! - `signin-url`                                 where to sign in with GitHub
//! - `chat <room>`                                stdin lines out, room messages in

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use devcollab_core::models::{ContentEntry, ContentKind, Contents, Message, Repository};
use devcollab_core::{
    ChatSurface, DevcollabConfig, FileEditor, GithubClient, GoTrueSessionProvider,
    IdentityEnricher, RealtimeMode, SessionProvider, SessionResolver, SignInOptions, StaticSessionProvider,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_CONFIG: &str = "devcollab.toml";

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "devcollab", version, about = "DevCollab terminal client")]
struct Cli {
    /// GitHub provider token of the current session
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Backend session JWT used to join chat channels as the signed-in user
    #[arg(long, env = "SUPABASE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Configuration file
    #[arg(short, long, env = "DEVCOLLAB_CONFIG", default_value = DEFAULT_CONFIG)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show the signed-in GitHub identity
    Whoami,

    /// List every repository of the signed-in user
    Repos {
        /// Output the repositories as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// List a directory of a repository
    Ls {
        repo: String,

        /// Directory path; the repository root when omitted
        #[arg(default_value = "")]
        path: String,

        /// Repository owner; defaults to the signed-in login
        #[arg(long)]
        owner: Option<String>,
    },

    /// Print a file of a repository
    Cat {
        repo: String,
        path: String,

        #[arg(long)]
        owner: Option<String>,
    },

    /// Replace a file with the contents of a local file and commit it
    Edit {
        repo: String,
        path: String,

        /// Local file holding the new contents
        #[arg(long)]
        from: String,

        /// Commit message
        #[arg(short, long)]
        message: String,

        #[arg(long)]
        owner: Option<String>,
    },

    /// Print the GitHub sign-in URL of the backend
    SigninUrl,

    /// Join a chat room; each stdin line is sent, Ctrl+D leaves
    Chat { room: String },
}

// ============================================================================
// Output formatting
// ============================================================================

fn format_repo(repo: &Repository) -> String {
    let visibility = if repo.private { "private" } else { "public" };
    match repo.description.as_deref().filter(|d| !d.is_empty()) {
        Some(d) => format!("{:<40} {:<8} {}", repo.full_name, visibility, d),
        None => format!("{:<40} {}", repo.full_name, visibility),
    }
}

fn format_entry(entry: &ContentEntry) -> String {
    match entry.kind {
        ContentKind::Dir => format!("{}/", entry.name),
        ContentKind::File => format!("{:<40} {:>8}", entry.name, entry.size),
        ContentKind::Symlink => format!("{}@", entry.name),
        ContentKind::Submodule => format!("{} (submodule)", entry.name),
    }
}

fn format_message(message: &Message, own_id: Option<&str>) -> String {
    let who = if own_id == Some(message.sender_id.as_str()) {
        "you"
    } else {
        message.sender_name.as_str()
    };
    format!("[{}] {}: {}", message.sent_at_display, who, message.content)
}

// ============================================================================
// Commands
// ============================================================================

/// Resolve the session once and hand back its provider token.
async fn provider_token(token: Option<String>) -> Result<String> {
    let provider: Arc<dyn SessionProvider> = Arc::new(StaticSessionProvider::from_token(token));
    let mut resolver = SessionResolver::new(provider);
    resolver.resolve().await;
    let token = resolver
        .require_provider_token()
        .context("not signed in; pass --token or set GITHUB_TOKEN")?;
    Ok(token.to_string())
}

async fn owner_or_login(github: &GithubClient, token: &str, owner: Option<String>) -> Result<String> {
    match owner {
        Some(o) => Ok(o),
        None => Ok(github.current_user(token).await?.login),
    }
}

async fn do_whoami(github: &GithubClient, token: &str) -> Result<()> {
    let mut enricher = IdentityEnricher::new(github.clone());
    let Some(identity) = enricher.enrich(token).await else {
        bail!("could not load the GitHub profile for this token");
    };
    println!("Login:  {}", identity.display_name);
    println!("Id:     {}", identity.id);
    println!("Avatar: {}", identity.avatar_url);
    Ok(())
}

async fn do_repos(github: &GithubClient, token: &str, json: bool) -> Result<()> {
    let repos = github.list_all_repos(token).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&repos)?);
        return Ok(());
    }
    if repos.is_empty() {
        eprintln!("No repositories found");
    }
    for repo in &repos {
        println!("{}", format_repo(repo));
    }
    Ok(())
}

async fn do_ls(github: &GithubClient, token: &str, repo: &str, path: &str, owner: Option<String>) -> Result<()> {
    let owner = owner_or_login(github, token, owner).await?;
    match github.get_contents(token, &owner, repo, path).await? {
        Contents::Directory { entries } => {
            for entry in &entries {
                println!("{}", format_entry(entry));
            }
        }
        Contents::File(file) => println!("{:<40} {}", file.path, file.sha),
    }
    Ok(())
}

async fn do_cat(github: &GithubClient, token: &str, repo: &str, path: &str, owner: Option<String>) -> Result<()> {
    let owner = owner_or_login(github, token, owner).await?;
    let file = github.get_file(token, &owner, repo, path).await?;
    print!("{}", file.content);
    Ok(())
}

async fn do_edit(
    github: &GithubClient,
    token: &str,
    target: (&str, &str),
    from: &str,
    message: &str,
    owner: Option<String>,
) -> Result<()> {
    let (repo, path) = target;
    let owner = owner_or_login(github, token, owner).await?;
    let text = tokio::fs::read_to_string(from)
        .await
        .with_context(|| format!("reading {}", from))?;

    let mut editor = FileEditor::open(github, token, &owner, repo, path).await?;
    if editor.text() == text {
        eprintln!("{} is unchanged, nothing to commit", path);
        return Ok(());
    }
    let result = editor.save(github, token, &text, message).await?;
    println!("Committed {} ({})", editor.path(), result.commit_sha);
    Ok(())
}

fn do_signin_url(config: &DevcollabConfig) -> Result<()> {
    let auth = GoTrueSessionProvider::new(config.backend.clone())?;
    let url = auth.sign_in_url(
        "github",
        &SignInOptions {
            redirect_url: config.http.redirect_url.clone(),
            scopes: config.http.scopes.clone(),
        },
    )?;
    println!("{}", url);
    Ok(())
}

/// The in-process hub is only reachable from inside one server process.
fn ensure_shared_realtime(config: &DevcollabConfig) -> Result<()> {
    if config.realtime.mode == RealtimeMode::Local {
        bail!("realtime.mode = \"local\" cannot reach other participants from the CLI; use \"supabase\"");
    }
    Ok(())
}

async fn do_chat(
    config: &DevcollabConfig,
    github: &GithubClient,
    token: &str,
    access_token: Option<&str>,
    room: &str,
) -> Result<()> {
    ensure_shared_realtime(config)?;

    let mut surface = ChatSurface::new(devcollab_core::create_realtime(config, access_token));
    let mut enricher = IdentityEnricher::new(github.clone());
    let Some(identity) = enricher.enrich(token).await else {
        bail!("could not load the GitHub profile for this token");
    };
    surface.authenticate(identity.clone());

    surface.bind(room).await?;
    eprintln!("Joined #{} (Ctrl+D to leave)", room);
    let own_id = surface.identity().map(|i| i.id.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = surface.send(&line).await {
                    eprintln!("devcollab: {}", e);
                }
            }
            inbound = surface.next_inbound() => {
                let Some(message) = inbound else {
                    eprintln!("devcollab: realtime channel closed");
                    break;
                };
                println!("{}", format_message(&message, own_id.as_deref()));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    surface.unmount().await;
    eprintln!("Left #{}", room);
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

async fn run(cli: Cli) -> Result<()> {
    if let Commands::SigninUrl = cli.command {
        let config = DevcollabConfig::load(&cli.config)?;
        return do_signin_url(&config);
    }

    let config = match &cli.command {
        Commands::Chat { .. } => DevcollabConfig::load(&cli.config)?,
        _ => DevcollabConfig::load_unresolved(&cli.config)?,
    };
    let github = GithubClient::new(config.github.clone())?;
    let token = provider_token(cli.token).await?;

    match cli.command {
        Commands::Whoami => do_whoami(&github, &token).await,
        Commands::Repos { json } => do_repos(&github, &token, json).await,
        Commands::Ls { repo, path, owner } => do_ls(&github, &token, &repo, &path, owner).await,
        Commands::Cat { repo, path, owner } => do_cat(&github, &token, &repo, &path, owner).await,
        Commands::Edit {
            repo,
            path,
            from,
            message,
            owner,
        } => do_edit(&github, &token, (&repo, &path), &from, &message, owner).await,
        Commands::Chat { room } => {
            do_chat(&config, &github, &token, cli.access_token.as_deref(), &room).await
        }
        Commands::SigninUrl => Ok(()),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for piping
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("devcollab: {:#}", e);
        std::process::exit(1);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use devcollab_core::models::repo::RepositoryOwner;

    fn repo(full_name: &str, private: bool, description: Option<&str>) -> Repository {
        Repository {
            id: 1,
            name: full_name.rsplit('/').next().unwrap().to_string(),
            full_name: full_name.to_string(),
            owner: RepositoryOwner {
                login: full_name.split('/').next().unwrap().to_string(),
            },
            description: description.map(str::to_string),
            private,
            default_branch: None,
            topics: vec![],
        }
    }

    fn entry(kind: ContentKind, name: &str) -> ContentEntry {
        ContentEntry {
            kind,
            name: name.to_string(),
            path: name.to_string(),
            sha: "abc".to_string(),
            size: 42,
        }
    }

    fn message(sender_id: &str, sender_name: &str, content: &str) -> Message {
        Message {
            id: format!("{}-1700000000000", sender_id),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            sender_avatar: String::new(),
            content: content.to_string(),
            sent_at_display: "3:04 PM".to_string(),
        }
    }

    #[test]
    fn test_cli_parses_edit() {
        let cli = Cli::try_parse_from([
            "devcollab", "--token", "t", "edit", "api", "src/lib.rs", "--from", "lib.rs", "-m",
            "Fix typo",
        ])
        .unwrap();
        match cli.command {
            Commands::Edit {
                repo,
                path,
                from,
                message,
                owner,
            } => {
                assert_eq!(repo, "api");
                assert_eq!(path, "src/lib.rs");
                assert_eq!(from, "lib.rs");
                assert_eq!(message, "Fix typo");
                assert!(owner.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_cli_ls_path_defaults_to_root() {
        let cli = Cli::try_parse_from(["devcollab", "ls", "api", "--owner", "acme"]).unwrap();
        match cli.command {
            Commands::Ls { path, owner, .. } => {
                assert_eq!(path, "");
                assert_eq!(owner.as_deref(), Some("acme"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_format_repo() {
        let line = format_repo(&repo("octocat/api", true, Some("Backend")));
        assert!(line.starts_with("octocat/api"));
        assert!(line.contains("private"));
        assert!(line.ends_with("Backend"));

        let line = format_repo(&repo("octocat/web", false, Some("")));
        assert!(line.ends_with("public"));
    }

    #[test]
    fn test_format_entry_marks_kinds() {
        assert_eq!(format_entry(&entry(ContentKind::Dir, "src")), "src/");
        assert_eq!(format_entry(&entry(ContentKind::Symlink, "link")), "link@");
        assert!(format_entry(&entry(ContentKind::File, "README.md")).ends_with("42"));
    }

    #[test]
    fn test_format_message_marks_own_messages() {
        let mine = message("7", "octocat", "hi");
        assert_eq!(format_message(&mine, Some("7")), "[3:04 PM] you: hi");

        let theirs = message("9", "hubot", "hello");
        assert_eq!(format_message(&theirs, Some("7")), "[3:04 PM] hubot: hello");
        assert_eq!(format_message(&theirs, None), "[3:04 PM] hubot: hello");
    }

    #[test]
    fn test_chat_refuses_local_realtime() {
        let mut config = DevcollabConfig::load_unresolved("does-not-exist.toml").unwrap();
        config.realtime.mode = RealtimeMode::Local;
        let err = ensure_shared_realtime(&config).unwrap_err();
        assert!(err.to_string().contains("local"));

        config.realtime.mode = RealtimeMode::Supabase;
        assert!(ensure_shared_realtime(&config).is_ok());
    }

    #[tokio::test]
    async fn test_provider_token_requires_session() {
        assert!(provider_token(None).await.is_err());
        assert!(provider_token(Some(String::new())).await.is_err());
        assert_eq!(provider_token(Some("gho_x".to_string())).await.unwrap(), "gho_x");
    }
}
