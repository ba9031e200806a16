use crate::auth::{
    auth_error_message, AuthFlow, AuthProvider, FormErrors, LoginForm, RegistrationForm,
};
use crate::config::Config;
use crate::error::FeedError;
use crate::feed::{FeedFilter, FeedSession, FeedStatus, FeedView};
use crate::local_store::LocalBackend;
use crate::post::{Post, PostDraft};
use crate::ui_state::PostMenuState;
use crate::CurrentUser;
use colored::*;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Interactive terminal client over the local post store.
pub async fn run(config: Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    let backend = Arc::new(
        LocalBackend::open(&config.data_dir)
            .map_err(|e| anyhow::anyhow!("Failed to open post store: {}", e))?,
    );
    let mut app = App::new(config, backend);

    print_usage();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut view = app.session.view();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match app.handle_line(line.trim()).await {
                    Flow::Continue => {}
                    Flow::SwitchedFeed => view = app.session.view(),
                    Flow::Quit => break,
                }
            }
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = view.borrow_and_update().clone();
                app.show(&snapshot);
            }
            Some(err) = app.session.next_error() => {
                print_error(&err);
            }
        }
    }

    app.session.close().await;
    Ok(())
}

enum Flow {
    Continue,
    SwitchedFeed,
    Quit,
}

struct App {
    config: Config,
    backend: Arc<LocalBackend>,
    user: Option<CurrentUser>,
    filter: FeedFilter,
    session: FeedSession,
    menu: PostMenuState,
    /// Posts as last printed, for index lookups
    shown: Vec<Post>,
}

fn profile_filter(user: Option<&CurrentUser>) -> Option<FeedFilter> {
    user.map(|u| FeedFilter::Author(u.uid.clone()))
}

fn spawn_session(
    backend: &Arc<LocalBackend>,
    filter: &FeedFilter,
    user: Option<CurrentUser>,
    config: &Config,
) -> FeedSession {
    FeedSession::spawn(
        backend.clone(),
        backend.clone(),
        filter.clone(),
        user,
        config.session_options(),
    )
}

impl App {
    fn new(config: Config, backend: Arc<LocalBackend>) -> Self {
        let user = config.current_user();
        let filter = if config.start_on_profile {
            profile_filter(user.as_ref()).unwrap_or(FeedFilter::All)
        } else {
            FeedFilter::All
        };
        let session = spawn_session(&backend, &filter, user.clone(), &config);
        Self {
            config,
            backend,
            user,
            filter,
            session,
            menu: PostMenuState::default(),
            shown: Vec::new(),
        }
    }

    /// Unmount the current feed view and mount one for `filter`
    async fn switch_feed(&mut self, filter: FeedFilter) {
        let next = spawn_session(&self.backend, &filter, self.user.clone(), &self.config);
        let previous = std::mem::replace(&mut self.session, next);
        previous.close().await;
        self.filter = filter;
        self.menu.cancel();
    }

    /// Swap the signed-in user and remount the home feed under it
    async fn set_user(&mut self, user: Option<CurrentUser>) -> Flow {
        self.user = user;
        self.switch_feed(FeedFilter::All).await;
        match &self.user {
            Some(u) => println!(
                "{} Signed in as {}",
                "✓".green().bold(),
                u.author_display_name().bright_white().bold()
            ),
            None => println!("{}", "Signed out".dimmed()),
        }
        Flow::SwitchedFeed
    }

    async fn register(&mut self, form: RegistrationForm) -> Flow {
        let errors = form.validate();
        if !errors.is_empty() {
            print_form_errors(&errors);
            return Flow::Continue;
        }
        match self.backend.sign_up(&form).await {
            Ok(user) => self.set_user(Some(user)).await,
            Err(e) => {
                print_auth_error(AuthFlow::Register, &e.code);
                Flow::Continue
            }
        }
    }

    async fn login(&mut self, form: LoginForm) -> Flow {
        let errors = form.validate();
        if !errors.is_empty() {
            print_form_errors(&errors);
            return Flow::Continue;
        }
        match self.backend.sign_in(&form).await {
            Ok(user) => self.set_user(Some(user)).await,
            Err(e) => {
                print_auth_error(AuthFlow::Login, &e.code);
                Flow::Continue
            }
        }
    }

    fn post_at(&self, arg: &str) -> Option<Post> {
        let n = arg.parse::<usize>().ok()?;
        self.shown.get(n.checked_sub(1)?).cloned()
    }

    async fn handle_line(&mut self, line: &str) -> Flow {
        // A pending edit takes the next line as its new content
        if self.menu.is_editing() {
            if line == "cancel" {
                self.menu.cancel();
                println!("{}", "Edit cancelled".dimmed());
                return Flow::Continue;
            }
            self.menu.update_draft(line);
            if let Some((post_id, draft)) = self.menu.take_edit() {
                self.report(self.session.edit(post_id, draft).await, "Saving...");
            }
            return Flow::Continue;
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match command {
            "" => {}
            "help" => print_usage(),
            "quit" | "exit" => return Flow::Quit,
            "whoami" => match &self.user {
                Some(u) => println!(
                    "{} {} ({})",
                    "👤".cyan(),
                    u.author_display_name().bright_white().bold(),
                    u.email.as_deref().unwrap_or("").dimmed()
                ),
                None => println!("{}", "Not signed in (use login or register)".yellow()),
            },
            "register" => {
                let args: Vec<&str> = rest.split_whitespace().collect();
                let [username, email, password, confirm] = args[..] else {
                    println!(
                        "{}",
                        "Usage: register <username> <email> <password> <confirm>".yellow()
                    );
                    return Flow::Continue;
                };
                return self
                    .register(RegistrationForm {
                        username: username.to_string(),
                        email: email.to_string(),
                        password: password.to_string(),
                        confirm_password: confirm.to_string(),
                    })
                    .await;
            }
            "login" => {
                let args: Vec<&str> = rest.split_whitespace().collect();
                let [email, password] = args[..] else {
                    println!("{}", "Usage: login <email> <password>".yellow());
                    return Flow::Continue;
                };
                return self
                    .login(LoginForm {
                        email: email.to_string(),
                        password: password.to_string(),
                    })
                    .await;
            }
            "logout" => {
                if self.user.is_none() {
                    println!("{}", "Not signed in".yellow());
                    return Flow::Continue;
                }
                return self.set_user(None).await;
            }
            "feed" => {
                if self.filter != FeedFilter::All {
                    self.switch_feed(FeedFilter::All).await;
                    return Flow::SwitchedFeed;
                }
                let view = self.session.current();
                self.show(&view);
            }
            "mine" => match profile_filter(self.user.as_ref()) {
                Some(filter) => {
                    self.switch_feed(filter).await;
                    return Flow::SwitchedFeed;
                }
                None => print_error(&FeedError::not_authenticated()),
            },
            "post" => {
                let (title, content) = match rest.split_once('|') {
                    Some((t, c)) => (t.trim(), c.trim()),
                    None => ("", rest),
                };
                match self.session.create(PostDraft::new(title, content)).await {
                    Ok(id) => {
                        println!("{} Posted ({})", "✓".green().bold(), id.as_str().dimmed())
                    }
                    Err(e) => print_error(&e),
                }
            }
            "menu" => match self.post_at(rest) {
                Some(post) => {
                    self.menu.toggle_options(&post.id);
                    if self.menu.options_open_for(&post.id) {
                        println!(
                            "  {} {}   {} {}",
                            "edit".cyan(),
                            rest,
                            "delete".cyan(),
                            rest
                        );
                    }
                }
                None => println!("{}", "No such post".yellow()),
            },
            "edit" => {
                let (index, text) = rest.split_once(' ').unwrap_or((rest, ""));
                match self.post_at(index) {
                    Some(post) if text.trim().is_empty() => {
                        println!("{} {}", "Current:".dimmed(), post.content);
                        println!("{}", "Enter new content (or 'cancel'):".bright_white());
                        self.menu.start_edit(&post);
                    }
                    Some(post) => {
                        self.menu.cancel();
                        let result = self.session.edit(post.id, text.trim()).await;
                        self.report(result, "Saving...");
                    }
                    None => println!("{}", "No such post".yellow()),
                }
            }
            "delete" => match self.post_at(rest) {
                Some(post) => {
                    self.menu.cancel();
                    let result = self.session.delete(post.id).await;
                    self.report(result, "Deleting...");
                }
                None => println!("{}", "No such post".yellow()),
            },
            "retry" => {
                if let Err(e) = self.session.resubscribe().await {
                    print_error(&e);
                }
            }
            other => {
                eprintln!("{} Unknown command: {}", "✗".red().bold(), other.red());
                print_usage();
            }
        }
        Flow::Continue
    }

    fn report(&self, result: Result<(), FeedError>, progress: &str) {
        match result {
            Ok(()) => println!("{}", progress.dimmed()),
            Err(e) => print_error(&e),
        }
    }

    fn show(&mut self, view: &FeedView) {
        self.menu.retain_visible(&view.posts);
        self.shown = view.posts.clone();

        let heading = match self.filter {
            FeedFilter::All => "Feed",
            FeedFilter::Author(_) => "Your Posts",
        };
        println!();
        match view.status {
            FeedStatus::Loading => {
                println!("{}", "Loading posts...".bright_cyan());
                return;
            }
            FeedStatus::Unavailable => println!(
                "{} {}",
                "⚠ Feed unavailable.".yellow().bold(),
                "Type 'retry' to reconnect.".dimmed()
            ),
            FeedStatus::Live => {}
        }
        println!("{}", heading.bright_white().bold());

        if view.posts.is_empty() {
            println!("  {}", "No posts yet.".dimmed());
            return;
        }
        for (i, post) in view.posts.iter().enumerate() {
            print_post(i + 1, post);
        }
        if view.pending > 0 {
            println!("  {}", format!("{} change(s) syncing", view.pending).dimmed());
        }
    }
}

fn print_post(n: usize, post: &Post) {
    let when = post
        .created_at
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M");
    println!(
        "  {} {}",
        format!("[{}]", n).cyan(),
        post.display_title().bright_blue().bold()
    );
    if !post.content.is_empty() {
        println!("      {}", post.content);
    }
    println!(
        "      {} {}",
        format!("👤 {}", post.display_author()).dimmed(),
        when.to_string().dimmed()
    );
}

fn print_error(err: &FeedError) {
    eprintln!("{} {}", "✗".red().bold(), err.to_string().red());
}

fn print_form_errors(errors: &FormErrors) {
    for msg in errors.messages() {
        eprintln!("{} {}", "✗".red().bold(), msg.red());
    }
}

fn print_auth_error(flow: AuthFlow, code: &str) {
    eprintln!("{} {}", "✗".red().bold(), auth_error_message(flow, code).red());
}

fn print_usage() {
    println!("{}", "⚡ Voxie".bright_cyan().bold());
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!(
        "  {} <user> <email> <pw> <pw>  Create an account",
        "register".cyan()
    );
    println!("  {} <email> <password>     Sign in", "login".cyan());
    println!("  {}                       Sign out", "logout".cyan());
    println!("  {}                         Show the home feed", "feed".cyan());
    println!("  {}                         Show only your posts", "mine".cyan());
    println!(
        "  {} <title> | <content>     Create a post",
        "post".cyan()
    );
    println!("  {} <n>                     Toggle a post's options", "menu".cyan());
    println!(
        "  {} <n> [content]           Edit a post's content",
        "edit".cyan()
    );
    println!("  {} <n>                   Delete a post", "delete".cyan());
    println!("  {}                        Reconnect a lost feed", "retry".cyan());
    println!("  {}                       Show who you are", "whoami".cyan());
    println!("  {}                         Exit", "quit".cyan());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::time::Duration;

    fn app() -> App {
        let backend = Arc::new(LocalBackend::temporary().unwrap());
        App::new(Config::default(), backend)
    }

    async fn wait_until_listed(app: &App, content: &str) -> Post {
        let mut view = app.session.view();
        let found = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(post) = view
                    .borrow_and_update()
                    .posts
                    .iter()
                    .find(|p| p.content == content)
                {
                    return post.clone();
                }
                view.changed().await.unwrap();
            }
        });
        found.await.unwrap()
    }

    #[tokio::test]
    async fn test_register_signs_in_with_username() {
        let mut app = app();
        assert!(app.user.is_none());

        let flow = app
            .handle_line("register alice alice@example.com secret1 secret1")
            .await;
        assert!(matches!(flow, Flow::SwitchedFeed));
        let user = app.user.clone().unwrap();
        assert_eq!(user.author_display_name(), "alice");

        app.session.create(PostDraft::new("", "hello")).await.unwrap();
        let post = wait_until_listed(&app, "hello").await;
        assert_eq!(post.author_id, user.uid);
        assert_eq!(post.author_display_name, "alice");
    }

    #[tokio::test]
    async fn test_invalid_registration_keeps_user() {
        let mut app = app();
        let flow = app
            .handle_line("register alice alice@example.com secret1 secret2")
            .await;
        assert!(matches!(flow, Flow::Continue));
        assert!(app.user.is_none());
    }

    #[tokio::test]
    async fn test_logout_makes_feed_read_only() {
        let mut app = app();
        app.handle_line("register alice alice@example.com secret1 secret1")
            .await;
        app.session.create(PostDraft::new("", "mine")).await.unwrap();
        let post = wait_until_listed(&app, "mine").await;

        let flow = app.handle_line("logout").await;
        assert!(matches!(flow, Flow::SwitchedFeed));
        assert!(app.user.is_none());
        wait_until_listed(&app, "mine").await;

        let err = app.session.edit(post.id, "edited").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotAuthenticated);
        let err = app
            .session
            .create(PostDraft::new("", "again"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotAuthenticated);
    }

    #[tokio::test]
    async fn test_login_checks_password() {
        let mut app = app();
        app.handle_line("register bob bob@example.com secret1 secret1")
            .await;
        app.handle_line("logout").await;

        let flow = app.handle_line("login bob@example.com wrong-pass").await;
        assert!(matches!(flow, Flow::Continue));
        assert!(app.user.is_none());

        let flow = app.handle_line("login BOB@example.com secret1").await;
        assert!(matches!(flow, Flow::SwitchedFeed));
        assert_eq!(app.user.as_ref().unwrap().author_display_name(), "bob");
    }
}
