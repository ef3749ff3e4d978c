//! Session phase tracking and the command transition table.

use media_player_types::Phase;

/// External commands subject to the transition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Create,
    Realize,
    Unrealize,
    Start,
    Stop,
    Pause,
    Resume,
    Destroy,
    Seek,
}

impl Command {
    pub const ALL: [Command; 9] = [
        Command::Create,
        Command::Realize,
        Command::Unrealize,
        Command::Start,
        Command::Stop,
        Command::Pause,
        Command::Resume,
        Command::Destroy,
        Command::Seek,
    ];

    fn row(self) -> usize {
        match self {
            Command::Create => 0,
            Command::Realize => 1,
            Command::Unrealize => 2,
            Command::Start => 3,
            Command::Stop => 4,
            Command::Pause => 5,
            Command::Resume => 6,
            Command::Destroy => 7,
            Command::Seek => 8,
        }
    }

    /// Phase the command drives the session to.
    pub fn target(self) -> Option<Phase> {
        match self {
            Command::Create | Command::Unrealize => Some(Phase::Null),
            Command::Realize | Command::Stop => Some(Phase::Ready),
            Command::Start | Command::Resume => Some(Phase::Playing),
            Command::Pause => Some(Phase::Paused),
            Command::Destroy => Some(Phase::None),
            Command::Seek => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// Succeed immediately without side effects.
    NoOp,
    Busy,
    /// Fail with invalid-state and leave everything untouched.
    Reject,
}

use Verdict::{Allow as A, NoOp as N, Reject as R};

/// Rows follow `Command::row`, columns follow `Phase::index`.
const TABLE: [[Verdict; 5]; 9] = [
    //  NONE NULL READY PAUSED PLAYING
    [A, N, R, R, R], // create
    [R, A, N, R, R], // realize
    [R, N, A, A, A], // unrealize
    [R, R, A, R, N], // start
    [R, R, N, A, A], // stop
    [R, R, A, N, A], // pause
    [R, R, R, A, N], // resume
    [N, A, A, A, A], // destroy
    [R, R, A, A, A], // seek
];

/// Table lookup with the pending-phase and seek-in-flight overrides.
pub fn verdict(cmd: Command, current: Phase, pending: Option<Phase>, seeking: bool) -> Verdict {
    if cmd == Command::Seek && seeking && current.is_pausable() {
        return Verdict::Busy;
    }
    if let (Some(p), Some(t)) = (pending, cmd.target()) {
        if p == t {
            return Verdict::NoOp;
        }
    }
    TABLE[cmd.row()][current.index()]
}

/// Externally visible phase change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Announce {
    pub previous: Phase,
    pub current: Phase,
}

/// Phase bookkeeping for one session.
#[derive(Clone, Debug, Default)]
pub struct PhaseTracker {
    pub current: Phase,
    pub previous: Phase,
    /// Phase the engine is transitioning toward.
    pub pending: Option<Phase>,
    /// Caller's ultimate desired phase.
    pub target: Phase,
    announced: Phase,
    pub sent_bos: bool,
    pub paused_once: bool,
    pub playing_once: bool,
}

impl PhaseTracker {
    /// Record a new caller target and what the engine is asked to reach.
    pub fn request(&mut self, target: Phase) {
        self.target = target;
        self.pending = (self.current != target).then_some(target);
    }

    /// Record an engine-reported change; returns what to announce, if anything.
    pub fn on_changed(&mut self, current: Phase) -> Option<Announce> {
        if current != self.current {
            self.previous = self.current;
            self.current = current;
        }
        if self.pending == Some(current) {
            self.pending = None;
        }
        if current == self.target && current != self.announced {
            let previous = self.announced;
            self.announced = current;
            return Some(Announce { previous, current });
        }
        None
    }

    /// Move without an engine report (no graph, or sentinel transitions).
    pub fn force(&mut self, phase: Phase) -> Option<Announce> {
        self.request(phase);
        self.on_changed(phase)
    }

    /// Forget per-session once-only flags.
    pub fn reset_session_flags(&mut self) {
        self.sent_bos = false;
        self.paused_once = false;
        self.playing_once = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn table_matches_documented_rows() {
        use Phase::*;
        assert_eq!(verdict(Command::Create, None, Option::None, false), Verdict::Allow);
        assert_eq!(verdict(Command::Realize, Ready, Option::None, false), Verdict::NoOp);
        assert_eq!(verdict(Command::Start, Paused, Option::None, false), Verdict::Reject);
        assert_eq!(verdict(Command::Resume, Ready, Option::None, false), Verdict::Reject);
        assert_eq!(verdict(Command::Stop, Ready, Option::None, false), Verdict::NoOp);
        assert_eq!(verdict(Command::Destroy, None, Option::None, false), Verdict::NoOp);
        assert_eq!(verdict(Command::Seek, Ready, Option::None, false), Verdict::Allow);
        assert_eq!(verdict(Command::Seek, Null, Option::None, false), Verdict::Reject);
    }

    #[test]
    fn seek_in_flight_is_busy() {
        assert_eq!(
            verdict(Command::Seek, Phase::Playing, None, true),
            Verdict::Busy
        );
        assert_eq!(verdict(Command::Seek, Phase::Ready, None, true), Verdict::Allow);
    }

    #[test]
    fn command_matching_pending_phase_is_noop() {
        assert_eq!(
            verdict(Command::Start, Phase::Paused, Some(Phase::Playing), false),
            Verdict::NoOp
        );
        assert_eq!(
            verdict(Command::Resume, Phase::Paused, Some(Phase::Playing), false),
            Verdict::NoOp
        );
    }

    #[test]
    fn intermediate_phases_are_silent() {
        let mut t = PhaseTracker::default();
        assert_eq!(
            t.force(Phase::Null),
            Some(Announce {
                previous: Phase::None,
                current: Phase::Null
            })
        );
        t.request(Phase::Playing);
        assert_eq!(t.on_changed(Phase::Ready), None);
        assert_eq!(t.on_changed(Phase::Paused), None);
        assert_eq!(t.pending, Some(Phase::Playing));
        assert_eq!(
            t.on_changed(Phase::Playing),
            Some(Announce {
                previous: Phase::Null,
                current: Phase::Playing
            })
        );
        assert_eq!(t.pending, None);
        assert_eq!(t.previous, Phase::Paused);
    }

    #[test]
    fn reaching_an_announced_phase_again_is_silent() {
        let mut t = PhaseTracker::default();
        t.force(Phase::Null);
        t.request(Phase::Playing);
        t.on_changed(Phase::Playing);
        // Buffering dip and recovery.
        assert_eq!(t.on_changed(Phase::Paused), None);
        assert_eq!(t.on_changed(Phase::Playing), None);
    }

    fn any_command() -> impl Strategy<Value = Command> {
        prop::sample::select(Command::ALL.to_vec())
    }

    fn any_phase() -> impl Strategy<Value = Phase> {
        prop::sample::select(Phase::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn pending_override_never_grants_more_than_noop(
            cmd in any_command(),
            current in any_phase(),
            pending in prop::option::of(any_phase()),
        ) {
            let with = verdict(cmd, current, pending, false);
            let without = verdict(cmd, current, None, false);
            prop_assert!(with == without || with == Verdict::NoOp);
        }

        #[test]
        fn busy_only_for_seek(cmd in any_command(), current in any_phase()) {
            let v = verdict(cmd, current, None, true);
            if v == Verdict::Busy {
                prop_assert_eq!(cmd, Command::Seek);
                prop_assert!(current.is_pausable());
            }
        }
    }
}
