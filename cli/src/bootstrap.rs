//! Starting outside of tmux: create a session, open the chat pane next to
//! the shell and relaunch ourselves in it.

use std::path::Path;
use std::time::Duration;

use tmuxai_core::tmux::PaneController;
use tracing::info;

use crate::Cli;

/// Time the new pane's shell gets to start before the relaunch command is
/// typed into it.
pub const SHELL_STARTUP: Duration = Duration::from_secs(1);

/// Shell command that starts `exe` with the same arguments as `cli`.
pub fn relaunch_command(exe: &Path, cli: &Cli) -> anyhow::Result<String> {
    let mut argv = vec![exe.to_string_lossy().into_owned()];
    argv.extend(cli.to_args());
    Ok(shlex::try_join(argv.iter().map(String::as_str))?)
}

/// The first pane of the new session becomes the exec pane; the chat pane is
/// split off to its right. Blocks until the user detaches.
pub async fn relaunch_in_tmux(
    panes: &dyn PaneController,
    command: &str,
    shell_startup: Duration,
) -> anyhow::Result<()> {
    let exec_pane = panes.create_session()?;
    let chat_pane = panes.create_adjacent_pane(&exec_pane)?;
    info!("created tmux session: exec pane {exec_pane}, chat pane {chat_pane}");

    panes.select_pane(&chat_pane)?;
    tokio::time::sleep(shell_startup).await;
    panes.send_keys(&chat_pane, command, true)?;
    panes.send_keys(&chat_pane, "Enter", false)?;

    panes.attach(&exec_pane)?;
    Ok(())
}
