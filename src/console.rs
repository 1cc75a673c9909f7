//! Line-oriented terminal front-end.

use std::{io::Write, sync::Arc};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use crate::{
    assistant::Assistant,
    db::UserProfile,
    insights,
    sensing::{AllowList, DistractionReason},
    session::{
        GateResolution, SessionController, SessionEvent, SessionHandle, SessionOutcome,
        SessionRequest, SessionStore, VerifyOutcome,
    },
};

const RECENT_SESSIONS: usize = 10;
const DEFAULT_MINUTES: u64 = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveCommand {
    LogDistraction,
    EndEarly(Option<u32>),
    Verify,
    Back,
    Ask(String),
    Status,
    Quit,
    Help,
}

pub fn parse_command(line: &str) -> Option<LiveCommand> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    if let Some(question) = line.strip_prefix('?') {
        let question = question.trim();
        return (!question.is_empty()).then(|| LiveCommand::Ask(question.to_string()));
    }

    match (head, rest) {
        ("d", "") => Some(LiveCommand::LogDistraction),
        ("e", "") => Some(LiveCommand::EndEarly(None)),
        ("e", count) => count.parse().ok().map(|n| LiveCommand::EndEarly(Some(n))),
        ("v", "") => Some(LiveCommand::Verify),
        ("b", "") => Some(LiveCommand::Back),
        ("s", "") => Some(LiveCommand::Status),
        ("q", "") => Some(LiveCommand::Quit),
        ("h" | "help", "") => Some(LiveCommand::Help),
        _ => None,
    }
}

fn reason_label(reason: DistractionReason) -> &'static str {
    match reason {
        DistractionReason::NoPresence => "you seem to have left the desk",
        DistractionReason::SwitchedApp => "you switched to an app outside your allow-list",
        DistractionReason::Inactivity => "no keyboard or mouse activity for a while",
    }
}

fn format_clock(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

enum LiveExit {
    Finished(SessionOutcome),
    Quit(SessionOutcome),
}

pub struct Console<S, R, W> {
    controller: SessionController<S>,
    assistant: Arc<dyn Assistant>,
    default_allow_list: Vec<String>,
    user_id: Option<i64>,
    input: Lines<R>,
    out: W,
}

impl<S, R, W> Console<S, R, W>
where
    S: SessionStore,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(
        controller: SessionController<S>,
        assistant: Arc<dyn Assistant>,
        default_allow_list: Vec<String>,
        user_id: Option<i64>,
        input: R,
        out: W,
    ) -> Self {
        Self {
            controller,
            assistant,
            default_allow_list,
            user_id,
            input: input.lines(),
            out,
        }
    }

    fn say(&mut self, text: impl AsRef<str>) -> Result<()> {
        writeln!(self.out, "{}", text.as_ref()).context("failed to write to terminal")?;
        self.out.flush().context("failed to flush terminal")
    }

    /// `None` on end of input.
    async fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.out, "{prompt}").context("failed to write to terminal")?;
        self.out.flush().context("failed to flush terminal")?;
        let line = self
            .input
            .next_line()
            .await
            .context("failed to read from terminal")?;
        Ok(line.map(|line| line.trim().to_string()))
    }

    pub async fn run(mut self) -> Result<()> {
        self.say("MindAnchor - anchor your mind, study smarter.")?;
        self.say(self.controller.capabilities().summary())?;

        let user_id = match self.user_id {
            Some(id) => Some(id),
            None => {
                let Some(profile) = self.create_profile().await? else {
                    return Ok(());
                };
                self.save_profile(&profile).await?
            }
        };

        loop {
            let Some(request) = self.plan_session(user_id).await? else {
                break;
            };
            let handle = match self.controller.start(request).await {
                Ok(handle) => handle,
                Err(err) => {
                    self.say(format!("Could not start the session: {err:#}"))?;
                    continue;
                }
            };

            match self.live(handle).await? {
                LiveExit::Finished(outcome) => self.show_result(user_id, &outcome).await?,
                LiveExit::Quit(outcome) => {
                    self.show_result(user_id, &outcome).await?;
                    break;
                }
            }

            match self.ask("Another session? [y/N] ").await? {
                Some(answer) if answer.eq_ignore_ascii_case("y") => continue,
                _ => break,
            }
        }

        self.say("Your sessions are saved locally. Good job today!")
    }

    async fn create_profile(&mut self) -> Result<Option<UserProfile>> {
        self.say("Let's set up your profile.")?;
        let Some(name) = self.ask("Name: ").await? else {
            return Ok(None);
        };
        let optional = |value: Option<String>| value.filter(|v| !v.is_empty());
        let country = optional(self.ask("Country (optional): ").await?);
        let age = optional(self.ask("Age (optional): ").await?).and_then(|age| age.parse().ok());
        let gender = optional(self.ask("Gender (optional): ").await?);
        let interest = optional(self.ask("Main study interest (optional): ").await?);

        Ok(Some(UserProfile {
            name: if name.is_empty() { "Student".to_string() } else { name },
            country,
            age,
            gender,
            interest,
        }))
    }

    /// `None` when the profile could not be stored; sessions are then saved
    /// without a user.
    async fn save_profile(&mut self, profile: &UserProfile) -> Result<Option<i64>> {
        match self.controller.store().create_user(profile).await {
            Ok(id) => {
                self.say(format!("Welcome, {}!", profile.name))?;
                Ok(Some(id))
            }
            Err(err) => {
                log::error!("Failed to save profile: {err:#}");
                self.say("Profile could not be saved; sessions will be kept without it.")?;
                Ok(None)
            }
        }
    }

    async fn plan_session(&mut self, user_id: Option<i64>) -> Result<Option<SessionRequest>> {
        let Some(topic) = self.ask("\nWhat are you studying? ").await? else {
            return Ok(None);
        };
        if topic.eq_ignore_ascii_case("q") {
            return Ok(None);
        }

        let minutes = loop {
            let Some(answer) = self.ask(&format!("Minutes [{DEFAULT_MINUTES}]: ")).await? else {
                return Ok(None);
            };
            if answer.is_empty() {
                break DEFAULT_MINUTES;
            }
            match answer.parse::<u64>() {
                Ok(minutes) if minutes > 0 => break minutes,
                _ => self.say("Enter a whole number of minutes.")?,
            }
        };

        let default_list = self.default_allow_list.join(", ");
        let Some(allowed) = self
            .ask(&format!("Allowed apps, comma separated [{default_list}]: "))
            .await?
        else {
            return Ok(None);
        };
        let allow_list = if allowed.is_empty() {
            AllowList::new(self.default_allow_list.iter())
        } else {
            AllowList::new(allowed.split(','))
        };

        Ok(Some(
            SessionRequest::new(user_id, topic, minutes * 60).with_allow_list(allow_list),
        ))
    }

    async fn live(&mut self, mut handle: SessionHandle) -> Result<LiveExit> {
        let Some(mut events) = handle.take_events() else {
            let outcome = handle.end_early(None).await?;
            return Ok(LiveExit::Finished(outcome));
        };
        self.say("Session started. Commands: d (log distraction), e [n] (end early), v (verify), b (I'm back), ? <question>, s (status), q (quit)")?;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(SessionEvent::Finished(outcome)) => return Ok(LiveExit::Finished(outcome)),
                    Some(event) => self.show_event(event)?,
                    None => {
                        let outcome = handle.wait().await?;
                        return Ok(LiveExit::Finished(outcome));
                    }
                },
                line = self.input.next_line() => {
                    let line = line.context("failed to read from terminal")?;
                    let Some(line) = line else {
                        let outcome = handle.end_early(None).await?;
                        return Ok(LiveExit::Quit(outcome));
                    };
                    match parse_command(&line) {
                        Some(LiveCommand::Quit) => {
                            let outcome = handle.end_early(None).await?;
                            return Ok(LiveExit::Quit(outcome));
                        }
                        Some(LiveCommand::EndEarly(count)) => {
                            let outcome = handle.end_early(count).await?;
                            return Ok(LiveExit::Finished(outcome));
                        }
                        Some(command) => self.run_command(&handle, command).await?,
                        None if line.trim().is_empty() => {}
                        None => self.say("Unknown command. Type h for help.")?,
                    }
                }
            }
        }
    }

    async fn run_command(&mut self, handle: &SessionHandle, command: LiveCommand) -> Result<()> {
        match command {
            LiveCommand::LogDistraction => {
                let count = handle.log_distraction().await?;
                self.say(format!("Logged. Stay honest: {count} distraction(s) so far."))
            }
            LiveCommand::Verify => match handle.verify().await? {
                VerifyOutcome::StillAbsent => {
                    self.say("Face not detected. Look at the camera and try again.")
                }
                VerifyOutcome::NotGated => self.say("Nothing to verify."),
                _ => Ok(()),
            },
            LiveCommand::Back => {
                if !handle.dismiss().await? {
                    self.say("You're already in focus mode.")?;
                }
                Ok(())
            }
            LiveCommand::Ask(question) => {
                let reply = self.assistant.respond(&question).await;
                self.say(format!("Anchor: {reply}"))
            }
            LiveCommand::Status => {
                let snapshot = handle.snapshot();
                self.say(format!(
                    "{} | {} left ({:.0}%) | distractions: {} | monitors: {:?}",
                    snapshot.topic,
                    format_clock(snapshot.remaining_secs),
                    snapshot.progress * 100.0,
                    snapshot.distractions,
                    snapshot.monitors
                ))
            }
            LiveCommand::Help => self.say(
                "d log distraction | e [n] end early | v verify | b I'm back | ? <text> ask | s status | q quit",
            ),
            LiveCommand::EndEarly(_) | LiveCommand::Quit => Ok(()),
        }
    }

    fn show_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Tick { remaining_secs } if remaining_secs % 60 == 0 => {
                self.say(format!("{} remaining", format_clock(remaining_secs)))
            }
            SessionEvent::GateOpened {
                reason,
                distractions,
            } => {
                self.say(format!(
                    "\n*** Distraction detected: {}. ({distractions} so far)",
                    reason_label(reason)
                ))?;
                self.say("*** Type v to verify via camera or b if you're back.")
            }
            SessionEvent::GateClosed { resolution } => match resolution {
                GateResolution::Verified => self.say("Verified. Back to focus."),
                GateResolution::Unverifiable => {
                    self.say("Camera check unavailable. Welcome back, back to focus.")
                }
                GateResolution::Dismissed => self.say("Welcome back. Back to focus."),
            },
            _ => Ok(()),
        }
    }

    async fn show_result(&mut self, user_id: Option<i64>, outcome: &SessionOutcome) -> Result<()> {
        self.say(format!(
            "\n{}! {} | time: {} | distractions: {}",
            outcome.verdict(),
            outcome.topic,
            format_clock(outcome.elapsed_secs),
            outcome.distractions
        ))?;

        let recent = match self
            .controller
            .store()
            .list_recent_sessions(user_id, RECENT_SESSIONS)
            .await
        {
            Ok(recent) => recent,
            Err(err) => {
                log::error!("Failed to load recent sessions: {err:#}");
                return Ok(());
            }
        };
        let summary = insights::summarize(&recent);
        self.say(format!(
            "Last {} sessions: {} min focused | avg distractions {:.2} | completed {}/{}",
            summary.session_count,
            summary.total_focus_secs / 60,
            summary.avg_distractions,
            summary.completed_count,
            summary.session_count
        ))?;
        if let Some(plan) = insights::suggest_plan(&recent) {
            self.say(format!("Suggestion: {}", plan.describe()))?;
        }
        Ok(())
    }
}
