//! Presence activity rendering for the persona prompt.

pub const NO_ACTIVITY: &str = "not currently doing anything.";

/// What a user is doing, as reported by their Discord presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivitySignal {
    Playing(String),
    Streaming(String),
    Listening {
        name: String,
        /// Track title, for Spotify.
        details: Option<String>,
        /// Artist, for Spotify.
        state: Option<String>,
    },
    Watching(String),
    Other(String),
}

impl ActivitySignal {
    pub fn describe(&self) -> String {
        match self {
            ActivitySignal::Playing(name) => format!("playing {}", name),
            ActivitySignal::Streaming(name) => format!("streaming {}", name),
            ActivitySignal::Listening {
                name,
                details: Some(track),
                state: Some(artist),
            } if name == "Spotify" => format!("listening to \"{}\" by {}", track, artist),
            ActivitySignal::Listening { name, .. } => format!("listening to {}", name),
            ActivitySignal::Watching(name) => format!("watching {}", name),
            ActivitySignal::Other(name) => format!("doing {}", name),
        }
    }
}

/// Comma-separated activities, or [`NO_ACTIVITY`] when there are none.
pub fn describe_activities(activities: &[ActivitySignal]) -> String {
    if activities.is_empty() {
        return NO_ACTIVITY.to_string();
    }
    activities
        .iter()
        .map(ActivitySignal::describe)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_activities() {
        assert_eq!(describe_activities(&[]), NO_ACTIVITY);

        let activities = vec![
            ActivitySignal::Playing("Celeste".to_string()),
            ActivitySignal::Listening {
                name: "Spotify".to_string(),
                details: Some("Plastic Love".to_string()),
                state: Some("Mariya Takeuchi".to_string()),
            },
            ActivitySignal::Listening {
                name: "a podcast".to_string(),
                details: None,
                state: None,
            },
            ActivitySignal::Other("Custom Status".to_string()),
        ];
        assert_eq!(
            describe_activities(&activities),
            "playing Celeste, listening to \"Plastic Love\" by Mariya Takeuchi, listening to a podcast, doing Custom Status"
        );
    }

    #[test]
    fn test_spotify_without_details_falls_back() {
        let activity = ActivitySignal::Listening {
            name: "Spotify".to_string(),
            details: Some("Track".to_string()),
            state: None,
        };
        assert_eq!(activity.describe(), "listening to Spotify");
    }
}
