//! Slide and narration sequencing for the presentation player.
//!
//! [`transition`] is pure: it returns the next state plus the side effects
//! the front end should perform, in order.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PlayerMode {
    Stopped,
    Playing,
    Paused,
    /// Narration is interrupted by a student question.
    Questioning { resume_playing: bool },
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerState {
    pub mode: PlayerMode,
    pub slide: usize,
    pub slide_count: usize,
}

impl PlayerState {
    pub fn new(slide_count: usize) -> Self {
        Self {
            mode: PlayerMode::Stopped,
            slide: 0,
            slide_count,
        }
    }

    fn at(self, mode: PlayerMode, slide: usize) -> Self {
        Self { mode, slide, ..self }
    }

    pub fn is_last_slide(&self) -> bool {
        self.slide + 1 >= self.slide_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "slide", rename_all = "snake_case")]
pub enum PlayerEvent {
    Play,
    Pause,
    Resume,
    Next,
    Previous,
    GoTo(usize),
    AudioFinished,
    QuestionStarted,
    QuestionFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "slide", rename_all = "snake_case")]
pub enum Effect {
    ShowSlide(usize),
    PlayAudio(usize),
    StopAudio,
    StartListening,
    StopListening,
}

fn navigate(state: PlayerState, target: usize) -> (PlayerState, Vec<Effect>) {
    if target >= state.slide_count || (target == state.slide && state.mode != PlayerMode::Finished) {
        return (state, Vec::new());
    }
    match state.mode {
        PlayerMode::Playing => (
            state.at(PlayerMode::Playing, target),
            vec![Effect::StopAudio, Effect::ShowSlide(target), Effect::PlayAudio(target)],
        ),
        PlayerMode::Questioning { .. } => (state, Vec::new()),
        PlayerMode::Finished => (state.at(PlayerMode::Paused, target), vec![Effect::ShowSlide(target)]),
        mode => (state.at(mode, target), vec![Effect::ShowSlide(target)]),
    }
}

pub fn transition(state: PlayerState, event: PlayerEvent) -> (PlayerState, Vec<Effect>) {
    use PlayerEvent as E;
    use PlayerMode as M;

    if state.slide_count == 0 {
        return (state, Vec::new());
    }
    let slide = state.slide;

    match (state.mode, event) {
        (M::Stopped, E::Play) => (
            state.at(M::Playing, slide),
            vec![Effect::ShowSlide(slide), Effect::PlayAudio(slide)],
        ),
        (M::Finished, E::Play) => (
            state.at(M::Playing, 0),
            vec![Effect::ShowSlide(0), Effect::PlayAudio(0)],
        ),
        (M::Paused, E::Play | E::Resume) => (state.at(M::Playing, slide), vec![Effect::PlayAudio(slide)]),
        (M::Playing, E::Pause) => (state.at(M::Paused, slide), vec![Effect::StopAudio]),

        (M::Playing, E::AudioFinished) if state.is_last_slide() => (state.at(M::Finished, slide), Vec::new()),
        (M::Playing, E::AudioFinished) => (
            state.at(M::Playing, slide + 1),
            vec![Effect::ShowSlide(slide + 1), Effect::PlayAudio(slide + 1)],
        ),

        (M::Playing, E::QuestionStarted) => (
            state.at(M::Questioning { resume_playing: true }, slide),
            vec![Effect::StopAudio, Effect::StartListening],
        ),
        (M::Stopped | M::Paused | M::Finished, E::QuestionStarted) => (
            state.at(M::Questioning { resume_playing: false }, slide),
            vec![Effect::StartListening],
        ),
        (M::Questioning { resume_playing: true }, E::QuestionFinished) => (
            state.at(M::Playing, slide),
            vec![Effect::StopListening, Effect::PlayAudio(slide)],
        ),
        (M::Questioning { resume_playing: false }, E::QuestionFinished) => {
            (state.at(M::Paused, slide), vec![Effect::StopListening])
        }

        (_, E::Next) => navigate(state, slide + 1),
        (_, E::Previous) => match slide.checked_sub(1) {
            Some(target) => navigate(state, target),
            None => (state, Vec::new()),
        },
        (_, E::GoTo(target)) => navigate(state, target),

        // Late audio callbacks, repeated presses and the like.
        _ => (state, Vec::new()),
    }
}
