use std::path::PathBuf;
use std::sync::Arc;

use chrono::Datelike;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kpsync::api::types::BatchAction;
use kpsync::cache::{CacheResult, CacheSource};
use kpsync::credentials::{CredentialSlot, CredentialStore, MemoryCredentialStore};
use kpsync::{Config, Identity, KnowledgePoint, KnowledgePointRef, SyncContext};

#[derive(Parser, Debug)]
#[command(name = "kpsync")]
#[command(about = "Offline-capable sync for knowledge point flashcards")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/kpsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Act as this user (default: $KPSYNC_USER_ID, else guest)
  #[arg(short, long)]
  user: Option<i64>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List active knowledge points
  Active,
  /// List archived knowledge points
  Archived,
  /// Show one knowledge point (OWNER:SEQ or legacy id)
  Show { point: KnowledgePointRef },
  Archive { point: KnowledgePointRef },
  Unarchive { point: KnowledgePointRef },
  Delete { point: KnowledgePointRef },
  /// Set mastery level (clamped to 0.0..=1.0)
  Mastery { point: KnowledgePointRef, level: f64 },
  /// Apply one action to several points
  Batch {
    action: BatchArg,
    #[arg(required = true)]
    points: Vec<KnowledgePointRef>,
  },
  /// Ask for an AI review of one point
  Review { point: KnowledgePointRef },
  Dashboard,
  /// Review activity for a month (default: current month)
  Heatmap {
    #[arg(long)]
    year: Option<i32>,
    #[arg(long)]
    month: Option<u32>,
  },
  /// Learning summary for a day (default: today)
  Summary {
    #[arg(long)]
    date: Option<chrono::NaiveDate>,
  },
  /// Fetch guest sample questions
  Sample {
    #[arg(long, default_value_t = 3)]
    count: u32,
  },
  /// Sign in; the password is read from $KPSYNC_PASSWORD
  Login {
    #[arg(long)]
    email: String,
  },
  Logout,
  /// Drop cached snapshots for the current identity
  ClearCache {
    /// Drop every identity's snapshots
    #[arg(long)]
    all: bool,
  },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BatchArg {
  Archive,
  Unarchive,
  Delete,
}

impl From<BatchArg> for BatchAction {
  fn from(arg: BatchArg) -> Self {
    match arg {
      BatchArg::Archive => BatchAction::Archive,
      BatchArg::Unarchive => BatchAction::Unarchive,
      BatchArg::Delete => BatchAction::Delete,
    }
  }
}

/// Log to a daily file under the data directory; stdout is for command output.
fn init_logging() -> Option<WorkerGuard> {
  let filter = EnvFilter::try_from_env("KPSYNC_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
  let registry = tracing_subscriber::registry().with(filter);

  match dirs::data_dir() {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir.join("kpsync").join("logs"), "kpsync.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      registry
        .with(
          tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false),
        )
        .init();
      Some(guard)
    }
    None => {
      registry
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
      None
    }
  }
}

fn print_points(result: &CacheResult<Vec<KnowledgePoint>>) {
  if let (CacheSource::Offline, Some(at)) = (result.source, result.cached_at) {
    eprintln!("offline: showing snapshot cached at {}", at);
  }
  for p in &result.data {
    println!(
      "{:<12} {:>4.0}%  {}  ({})",
      p.reference().to_string(),
      p.mastery_level * 100.0,
      p.correct_phrase,
      p.category
    );
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_logging();

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;
  let user_id = match args.user {
    Some(id) => Some(id),
    None => Config::user_id_from_env()?,
  };
  let identity = user_id.map(Identity::User).unwrap_or(Identity::Guest);

  let credentials = Arc::new(MemoryCredentialStore::from_env());
  let ctx = SyncContext::from_config(&config, credentials.clone(), identity)?;
  let repo = &ctx.repository;

  match args.command {
    Command::Active => print_points(&repo.fetch_active().await?),
    Command::Archived => print_points(&repo.fetch_archived().await?),
    Command::Show { point } => {
      let p = repo.fetch_point(point).await?;
      println!("{} [{} / {}]", p.correct_phrase, p.category, p.subcategory);
      println!("  {}", p.explanation);
      if !p.user_context_sentence.is_empty() {
        println!("  context: {}", p.user_context_sentence);
      }
      println!(
        "  mastery {:.2}, correct {}, mistakes {}, archived {}",
        p.mastery_level, p.correct_count, p.mistake_count, p.is_archived
      );
      if let Some(next) = p.next_review_date {
        println!("  next review {}", next);
      }
    }
    Command::Archive { point } => {
      repo.archive(point).await?;
      println!("archived {}", point);
    }
    Command::Unarchive { point } => {
      repo.unarchive(point).await?;
      println!("unarchived {}", point);
    }
    Command::Delete { point } => {
      repo.delete(point).await?;
      println!("deleted {}", point);
    }
    Command::Mastery { point, level } => {
      repo.update_mastery(point, level).await?;
      println!("mastery of {} set", point);
    }
    Command::Batch { action, points } => {
      let resp = repo.batch_action(action.into(), &points).await?;
      println!("processed {} of {}", resp.processed_count, points.len());
      if let Some(message) = resp.message {
        println!("{}", message);
      }
    }
    Command::Review { point } => {
      let review = repo.request_ai_review(point).await?;
      println!("{}", review.overall_assessment);
      for s in &review.suggestions {
        println!("  - {}", s);
      }
    }
    Command::Dashboard => {
      let d = repo.dashboard().await?;
      println!(
        "points {}  due {}  mastered {}  streak {}d",
        d.total_points, d.due_for_review, d.mastered, d.streak_days
      );
    }
    Command::Heatmap { year, month } => {
      let today = chrono::Local::now().date_naive();
      let heatmap = repo
        .calendar_heatmap(
          year.unwrap_or(today.year()),
          month.unwrap_or(today.month()),
        )
        .await?;
      for (day, count) in &heatmap.heatmap_data {
        println!("{} {}", day, count);
      }
    }
    Command::Summary { date } => {
      let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
      let summary = repo.daily_summary(date).await?;
      println!(
        "{}: reviewed {}, {} min",
        date,
        summary.reviewed_count,
        summary.total_learning_time_seconds / 60
      );
      println!("{}", summary.summary);
    }
    Command::Sample { count } => {
      for q in repo.sample_questions(count).await? {
        println!("[{}] {}", q.question_type, q.new_sentence);
      }
    }
    Command::Login { email } => {
      let password = Config::password_from_env()?;
      let user = ctx.auth.login(&email, &password).await?;
      eprintln!("signed in as {} (id {})", user.username, user.id);
      // Tokens only live for this process; hand them back for the shell.
      println!("export KPSYNC_USER_ID={}", user.id);
      for (slot, var) in [
        (CredentialSlot::AccessToken, "KPSYNC_ACCESS_TOKEN"),
        (CredentialSlot::RefreshToken, "KPSYNC_REFRESH_TOKEN"),
      ] {
        if let Some(token) = credentials.retrieve(slot)? {
          println!("export {}={}", var, token);
        }
      }
    }
    Command::Logout => {
      let cleared = ctx.auth.logout().await?;
      println!("signed out, {} cached snapshots removed", cleared);
    }
    Command::ClearCache { all } => {
      if all {
        let n = repo.clear_all_caches()?;
        println!("removed {} snapshots", n);
      } else {
        repo.clear_cache()?;
        println!("cleared cache for {}", ctx.session.namespace());
      }
    }
  }

  Ok(())
}
