//! Interactive operator console.
//!
//! Reads commands from stdin and redraws a status screen every two seconds
//! until the operator exits or every peer in the swarm has the whole file.

use std::fmt::Write as _;
use std::io::Write as _;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use swarmcast::{PeerId, PeerRole, PeerSummary, Swarm, SwarmSummary};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

const REFRESH_INTERVAL: Duration = Duration::from_secs(2);

const CLEAR_SCREEN: &str = "\x1b[H\x1b[2J";

const RULE: &str = "-----------------------------------------------------------------------------------------------------------------------------------";

const HELP: &str = "Available commands: (e)xit; (p)ause; (r)esume; (d)ownload limit_in_KB, (u)pload limit_in_KB. Enter (h)elp to disable this message.";

/// A parsed console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Exit,
    Pause,
    Resume,
    /// New download limit in bytes per second, `-1` for unlimited.
    DownloadLimit(i64),
    /// New upload limit in bytes per second, `-1` for unlimited.
    UploadLimit(i64),
    ToggleHelp,
    /// Show the detail line for a peer.
    Select(PeerId),
}

impl Command {
    /// Parses one line. Unknown or malformed input yields `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let first = words.next()?.to_lowercase();
        let rest: Vec<&str> = words.collect();

        let limit = |rest: &[&str]| -> Option<i64> {
            match rest {
                [] => Some(-1),
                [kib] => kib.parse::<i64>().ok().map(|k| k.saturating_mul(1024)),
                _ => None,
            }
        };

        match (first.as_str(), rest.as_slice()) {
            ("e" | "exit", []) => Some(Command::Exit),
            ("p" | "pause", []) => Some(Command::Pause),
            ("r" | "resume", []) => Some(Command::Resume),
            ("h" | "help", []) => Some(Command::ToggleHelp),
            ("d" | "download", rest) => limit(rest).map(Command::DownloadLimit),
            ("u" | "upload", rest) => limit(rest).map(Command::UploadLimit),
            (id, []) => id.parse().ok().and_then(PeerId::new).map(Command::Select),
            _ => None,
        }
    }
}

pub struct Console {
    swarm: Arc<Swarm>,
    selected: Option<PeerId>,
    show_help: bool,
}

impl Console {
    pub fn new(swarm: Arc<Swarm>) -> Self {
        Self {
            swarm,
            selected: None,
            show_help: false,
        }
    }

    /// Runs until the operator exits, the swarm stops, or every peer is
    /// complete. Stopping the swarm is left to the caller.
    pub async fn run(&mut self) {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        let mut ticker = interval(REFRESH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.swarm.is_running() {
                        break;
                    }
                    if self.swarm.all_peers_complete() {
                        info!(host = %self.swarm.host_id(), "every peer has the complete file");
                        break;
                    }
                    self.draw();
                }
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => {
                        let Some(command) = Command::parse(&line) else {
                            continue;
                        };
                        if self.apply(command).is_break() {
                            break;
                        }
                        self.draw();
                    }
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!(error = %e, "failed to read console input");
                        stdin_open = false;
                    }
                },
            }
        }
    }

    /// Applies a command to the swarm. Changing a limit also resumes.
    pub fn apply(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Exit => return ControlFlow::Break(()),
            Command::Pause => self.swarm.pause(),
            Command::Resume => self.swarm.resume(),
            Command::DownloadLimit(limit) => {
                self.swarm.resume();
                self.swarm.change_download_limit(limit);
            }
            Command::UploadLimit(limit) => {
                self.swarm.resume();
                self.swarm.change_upload_limit(limit);
            }
            Command::ToggleHelp => self.show_help = !self.show_help,
            Command::Select(peer) => self.selected = Some(peer),
        }
        ControlFlow::Continue(())
    }

    fn draw(&self) {
        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "{CLEAR_SCREEN}{}", self.render());
        let _ = stdout.flush();
    }

    /// The full status screen.
    pub fn render(&self) -> String {
        let swarm = &self.swarm;
        let common = swarm.common();
        let limiter = swarm.limiter();
        let mut out = String::new();

        let _ = writeln!(
            out,
            "File Name: {}    File Size: {} ({} B)    File Health: {}%",
            common.file_name,
            size_string(common.file_size),
            common.file_size,
            swarm.file_health_percentage()
        );
        let _ = writeln!(
            out,
            "Piece Size: {} ({} B)    Piece Count: {}    Download Limit: {}    Upload Limit: {}",
            size_string(common.piece_size),
            common.piece_size,
            swarm.piece_count(),
            limit_string(limiter.download_limit()),
            limit_string(limiter.upload_limit())
        );
        out.push('\n');

        out.push_str(&render_table(&swarm.swarm_table()));
        out.push('\n');

        if let Some(detail) = self.selected.and_then(|peer| swarm.peer_detail(peer)) {
            out.push_str(&render_detail(&detail));
        }
        if self.show_help {
            out.push_str(HELP);
            out.push('\n');
        }
        if swarm.is_paused() {
            out.push_str("Download / Upload Paused.\n");
        }
        out.push_str("Enter help for available commands; enter Peer ID for more details: ");
        out
    }
}

/// Human-readable size: divides by 1024 while the value is at least 10000.
pub fn size_string(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size;
    let mut level = 0;
    while size >= 10000 && level < UNITS.len() - 1 {
        size /= 1024;
        level += 1;
    }
    format!("{size} {}", UNITS[level])
}

fn limit_string(limit: i64) -> String {
    match u64::try_from(limit) {
        Ok(bytes) => format!("{}/s per Neighbor", size_string(bytes)),
        Err(_) => "No Limit".to_string(),
    }
}

fn yes(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "   "
    }
}

fn selection(peer: &PeerSummary) -> &'static str {
    match (peer.preferred, peer.optimistic) {
        (true, true) => "P O",
        (true, false) => "P  ",
        (false, true) => "O  ",
        (false, false) => "   ",
    }
}

pub fn render_table(table: &SwarmSummary) -> String {
    let mut out = String::new();
    let host = &table.host;

    out.push_str("                                   Download    Upload      Selected    Unchoked    Interest    Interested    Total       Total\n");
    out.push_str("Peer        Peer ID    Progress    Speed       Speed       by Host     Host        of Host     in Host       Download    Upload\n");
    out.push_str(RULE);
    out.push('\n');
    let _ = writeln!(
        out,
        "Host        {:<10} {:<4}        {:<12}{:<12}{:<8}    {:<8}    {:<8}    {:<8}      {:<12}{:<12}",
        host.peer_id,
        format!("{}%", host.progress_percent),
        format!("{}/s", size_string(host.download_rate)),
        format!("{}/s", size_string(host.upload_rate)),
        table.selected_count(),
        table.unchoked_host_count(),
        table.interest_of_host_count(),
        table.interested_in_host_count(),
        size_string(host.total_downloaded),
        size_string(host.total_uploaded),
    );
    out.push_str(RULE);
    out.push('\n');

    for peer in table.neighbors.iter().chain(&table.offline) {
        let (label, download, upload) = match peer.role {
            PeerRole::Offline => ("Offline ", "-".to_string(), "-".to_string()),
            _ => (
                "Neighbor",
                format!("{}/s", size_string(peer.download_rate)),
                format!("{}/s", size_string(peer.upload_rate)),
            ),
        };
        let _ = writeln!(
            out,
            "{label}    {:<10} {:<4}        {:<12}{:<12}{:>3}         {:>3}         {:>3}         {:>3}           {:<12}{:<12}",
            peer.peer_id,
            format!("{}%", peer.progress_percent),
            download,
            upload,
            selection(peer),
            yes(peer.unchoked_host),
            yes(peer.interest_of_host),
            yes(peer.interested_in_host),
            size_string(peer.total_downloaded),
            size_string(peer.total_uploaded),
        );
    }
    out
}

fn render_detail(peer: &PeerSummary) -> String {
    format!(
        "PeerID: {}    Hostname: {}    IP: {}    Port: {}    Complete Piece Count: {}\n",
        peer.peer_id,
        peer.hostname,
        peer.ip_address.as_deref().unwrap_or("-"),
        peer.port,
        peer.complete_pieces
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmcast::{CommonConfig, Config, LoggingConfig, PeerInfo};
    use tempfile::TempDir;

    fn id(n: u32) -> PeerId {
        PeerId::new(n).unwrap()
    }

    fn row(role: PeerRole, peer_id: u32) -> PeerSummary {
        PeerSummary {
            role,
            peer_id: id(peer_id),
            hostname: "localhost".to_string(),
            ip_address: Some("127.0.0.1".to_string()),
            port: 6008,
            complete_pieces: 2,
            progress_percent: 50,
            download_rate: 20480,
            upload_rate: 0,
            preferred: true,
            optimistic: false,
            unchoked_host: true,
            interest_of_host: false,
            interested_in_host: true,
            total_downloaded: 2048,
            total_uploaded: 0,
        }
    }

    async fn swarm(temp: &TempDir) -> Arc<Swarm> {
        let config = Config {
            common: CommonConfig {
                preferred_neighbors: 1,
                unchoking_interval: 5,
                optimistic_neighbors: 1,
                optimistic_interval: 15,
                file_name: "thefile".to_string(),
                file_size: 2_000_000,
                piece_size: 65536,
            },
            peers: vec![PeerInfo {
                peer_id: 1001,
                hostname: "localhost".to_string(),
                port: 0,
                has_file: true,
            }],
            logging: LoggingConfig::default(),
        };
        Swarm::new(&config, id(1001), -1, 100 * 1024, temp.path())
            .await
            .unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("e"), Some(Command::Exit));
        assert_eq!(Command::parse("EXIT"), Some(Command::Exit));
        assert_eq!(Command::parse("pause"), Some(Command::Pause));
        assert_eq!(Command::parse("r"), Some(Command::Resume));
        assert_eq!(Command::parse("h"), Some(Command::ToggleHelp));
        assert_eq!(Command::parse("1002"), Some(Command::Select(id(1002))));
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("bogus"), None);
        assert_eq!(Command::parse("e now"), None);
    }

    #[test]
    fn test_parse_limits() {
        assert_eq!(Command::parse("d"), Some(Command::DownloadLimit(-1)));
        assert_eq!(Command::parse("d 100"), Some(Command::DownloadLimit(102400)));
        assert_eq!(Command::parse("upload 0"), Some(Command::UploadLimit(0)));
        assert_eq!(Command::parse("u 5"), Some(Command::UploadLimit(5120)));
        assert_eq!(Command::parse("d fast"), None);
        assert_eq!(Command::parse("u 1 2"), None);
    }

    #[test]
    fn test_size_string() {
        assert_eq!(size_string(0), "0 B");
        assert_eq!(size_string(9999), "9999 B");
        assert_eq!(size_string(10000), "9 KB");
        assert_eq!(size_string(65536), "64 KB");
        assert_eq!(size_string(1_250_000_000), "1192 MB");
        assert_eq!(size_string(u64::MAX), "16777215 TB");
    }

    #[test]
    fn test_limit_string() {
        assert_eq!(limit_string(-1), "No Limit");
        assert_eq!(limit_string(0), "0 B/s per Neighbor");
        assert_eq!(limit_string(5000 * 1024), "5000 KB/s per Neighbor");
    }

    #[test]
    fn test_render_table_rows() {
        let mut host = row(PeerRole::Host, 1001);
        host.download_rate = 20480;
        let mut offline = row(PeerRole::Offline, 1003);
        offline.preferred = false;
        offline.unchoked_host = false;
        offline.interested_in_host = false;

        let table = SwarmSummary {
            host,
            neighbors: vec![row(PeerRole::Neighbor, 1002)],
            offline: vec![offline],
        };
        let text = render_table(&table);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 7);
        assert!(lines[3].starts_with("Host        1001       50%         20 KB/s"));
        assert!(lines[5].starts_with("Neighbor    1002       50%         20 KB/s     0 B/s       P           Yes"));
        assert!(lines[6].starts_with("Offline     1003       50%         -           -"));
        assert!(lines[6].contains("2048 B"));
    }

    #[tokio::test]
    async fn test_render_screen() {
        let temp = TempDir::new().unwrap();
        let mut console = Console::new(swarm(&temp).await);

        let screen = console.render();
        assert!(screen.starts_with(
            "File Name: thefile    File Size: 1953 KB (2000000 B)    File Health: 100%"
        ));
        assert!(screen.contains("Piece Count: 31"));
        assert!(screen.contains("Download Limit: No Limit    Upload Limit: 100 KB/s per Neighbor"));
        assert!(!screen.contains("PeerID:"));

        assert!(console.apply(Command::Select(id(1001))).is_continue());
        assert!(console.apply(Command::ToggleHelp).is_continue());
        assert!(console.apply(Command::Pause).is_continue());
        let screen = console.render();
        assert!(screen.contains("PeerID: 1001    Hostname: localhost"));
        assert!(screen.contains("Complete Piece Count: 31"));
        assert!(screen.contains(HELP));
        assert!(screen.contains("Download / Upload Paused."));
        assert!(screen.contains("Download Limit: 0 B/s per Neighbor"));
    }

    #[tokio::test]
    async fn test_limit_commands_resume() {
        let temp = TempDir::new().unwrap();
        let swarm = swarm(&temp).await;
        let mut console = Console::new(swarm.clone());

        let _ = console.apply(Command::Pause);
        assert!(swarm.is_paused());

        let _ = console.apply(Command::DownloadLimit(2048));
        assert!(!swarm.is_paused());
        assert_eq!(swarm.limiter().download_limit(), 2048);
        assert_eq!(swarm.limiter().upload_limit(), 100 * 1024);

        let _ = console.apply(Command::UploadLimit(-1));
        assert_eq!(swarm.limiter().upload_limit(), -1);

        assert!(console.apply(Command::Exit).is_break());
    }
}
