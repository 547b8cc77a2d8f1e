//! `karna display` – the presentation host.
//!
//! Follows the activity slot and switches the animation that matches each
//! token. Rendering is left to whatever plays the asset; this host reports
//! which asset is current.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;
use karna_middleware::{ActivityChannel, ActivityWatcher};
use karna_types::{ActivityToken, KarnaError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Animation file shown for `token`.
pub fn asset_for(token: ActivityToken) -> &'static str {
    match token {
        ActivityToken::Idle => "idle.gif",
        ActivityToken::Listening => "listening.gif",
        ActivityToken::Thinking => "thinking.gif",
        ActivityToken::Answering => "speaking.gif",
        ActivityToken::Last => "last.gif",
    }
}

pub struct Presenter<W> {
    animations_dir: PathBuf,
    showing: Option<PathBuf>,
    out: W,
}

impl<W: Write> Presenter<W> {
    pub fn new(animations_dir: impl Into<PathBuf>, out: W) -> Self {
        Self {
            animations_dir: animations_dir.into(),
            showing: None,
            out,
        }
    }

    /// Switch to the animation for `token`. A missing asset leaves the
    /// current animation on screen.
    pub fn show(&mut self, token: ActivityToken) {
        let asset = self.animations_dir.join(asset_for(token));
        if !asset.is_file() {
            warn!(token = %token, asset = %asset.display(), "animation asset missing");
            return;
        }
        info!(token = %token, asset = %asset.display(), "switching animation");
        if let Err(e) = writeln!(
            self.out,
            "  {} {:<10} {}",
            "▶".cyan().bold(),
            token.to_string().bold(),
            asset.display()
        ) {
            debug!(error = %e, "display output failed");
        }
        self.showing = Some(asset);
    }
}

/// Reset the slot to `idle`, follow it until `shutdown`, then remove it.
///
/// # Errors
///
/// Returns [`KarnaError::Activity`] if the slot cannot be created at start
/// or removed at the end.
pub async fn run<W: Write>(
    channel: ActivityChannel,
    mut presenter: Presenter<W>,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> Result<(), KarnaError> {
    channel.reset()?;
    presenter.show(ActivityToken::Idle);

    ActivityWatcher::new(channel.clone())
        .run(poll_interval, shutdown, |token| presenter.show(token))
        .await;

    channel.remove()?;
    info!(path = %channel.path().display(), "activity slot removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn animations(dir: &tempfile::TempDir, present: &[ActivityToken]) -> PathBuf {
        let anim = dir.path().join("animations");
        fs::create_dir_all(&anim).unwrap();
        for token in present {
            fs::write(anim.join(asset_for(*token)), b"GIF89a").unwrap();
        }
        anim
    }

    #[test]
    fn answering_plays_the_speaking_animation() {
        assert_eq!(asset_for(ActivityToken::Answering), "speaking.gif");
        assert_eq!(asset_for(ActivityToken::Last), "last.gif");
    }

    #[test]
    fn missing_asset_keeps_current_animation() {
        let dir = tempfile::tempdir().unwrap();
        let anim = animations(&dir, &[ActivityToken::Idle]);
        let mut presenter = Presenter::new(&anim, Vec::new());

        presenter.show(ActivityToken::Idle);
        presenter.show(ActivityToken::Thinking);

        assert_eq!(presenter.showing.as_deref(), Some(anim.join("idle.gif").as_path()));
        let shown = String::from_utf8(presenter.out).unwrap();
        assert_eq!(shown.lines().count(), 1);
    }

    #[tokio::test]
    async fn run_resets_follows_and_removes_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let anim = animations(&dir, &ActivityToken::ALL);
        let channel = ActivityChannel::new(dir.path().join("animation_state.txt"));
        // Stale value from a previous run.
        channel.publish(ActivityToken::Last).unwrap();

        let (tx, rx) = watch::channel(false);
        let host = tokio::spawn(run(
            channel.clone(),
            Presenter::new(&anim, std::io::sink()),
            Duration::from_millis(5),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(channel.path().exists());
        channel.publish(ActivityToken::Thinking).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), host)
            .await
            .expect("host stops")
            .unwrap()
            .unwrap();
        assert!(!channel.path().exists());
    }
}
