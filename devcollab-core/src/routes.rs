//! Route table for the dashboard and its authentication guard.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Landing,
    Dashboard,
    Chat { repo_id: String },
    Project { repo_id: String },
    Settings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Render(Route),
    Redirect(Route),
}

impl Route {
    /// Match a request path. Trailing slashes are ignored; anything outside
    /// the table is `None`.
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => Some(Route::Landing),
            ["dashboard"] => Some(Route::Dashboard),
            ["dashboard", "settings"] => Some(Route::Settings),
            ["dashboard", "chat", repo_id] => Some(Route::Chat {
                repo_id: repo_id.to_string(),
            }),
            ["dashboard", "project", repo_id] => Some(Route::Project {
                repo_id: repo_id.to_string(),
            }),
            _ => None,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Landing => "/".to_string(),
            Route::Dashboard => "/dashboard".to_string(),
            Route::Chat { repo_id } => format!("/dashboard/chat/{}", repo_id),
            Route::Project { repo_id } => format!("/dashboard/project/{}", repo_id),
            Route::Settings => "/dashboard/settings".to_string(),
        }
    }

    pub fn requires_session(&self) -> bool {
        !matches!(self, Route::Landing)
    }

    /// Signed-out visitors only see the landing page; signed-in visitors skip it.
    pub fn guard(self, authenticated: bool) -> Navigation {
        match (self, authenticated) {
            (Route::Landing, true) => Navigation::Redirect(Route::Dashboard),
            (route, false) if route.requires_session() => Navigation::Redirect(Route::Landing),
            (route, _) => Navigation::Render(route),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_paths() {
        assert_eq!(Route::parse("/"), Some(Route::Landing));
        assert_eq!(Route::parse("/dashboard/"), Some(Route::Dashboard));
        assert_eq!(Route::parse("/dashboard/settings"), Some(Route::Settings));
        assert_eq!(
            Route::parse("/dashboard/chat/general"),
            Some(Route::Chat {
                repo_id: "general".to_string()
            })
        );
        assert_eq!(
            Route::parse("/dashboard/project/api-service"),
            Some(Route::Project {
                repo_id: "api-service".to_string()
            })
        );
        assert_eq!(Route::parse("/dashboard/chat"), None);
        assert_eq!(Route::parse("/elsewhere"), None);
    }

    #[test]
    fn test_path_round_trips() {
        for route in [
            Route::Landing,
            Route::Dashboard,
            Route::Settings,
            Route::Chat {
                repo_id: "x".to_string(),
            },
            Route::Project {
                repo_id: "y".to_string(),
            },
        ] {
            assert_eq!(Route::parse(&route.path()), Some(route));
        }
    }

    #[test]
    fn test_guard_redirects() {
        assert_eq!(
            Route::Landing.guard(true),
            Navigation::Redirect(Route::Dashboard)
        );
        assert_eq!(Route::Landing.guard(false), Navigation::Render(Route::Landing));
        assert_eq!(
            Route::Settings.guard(false),
            Navigation::Redirect(Route::Landing)
        );
        let chat = Route::Chat {
            repo_id: "general".to_string(),
        };
        assert_eq!(chat.clone().guard(true), Navigation::Render(chat.clone()));
        assert_eq!(chat.guard(false), Navigation::Redirect(Route::Landing));
    }
}
