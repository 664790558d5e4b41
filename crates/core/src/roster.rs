//! The class roster. Only listed students can log in.

use fuzzy_matcher::{FuzzyMatcher, skim::SkimMatcherV2};

const MAX_SUGGESTIONS: usize = 3;

const STUDENTS: &[&str] = &[
    "Hoa Quang An",
    "Pham Quynh Anh",
    "Ha Thi Minh Anh",
    "Cao Nguyen Quynh Anh",
    "Tran Nguyet Anh",
    "Hoa Gia Binh",
    "Hoang Van Cong Chinh",
    "Nguyen Manh Cuong",
    "Tran Thi Dung",
    "Nguyen Thanh Dat",
    "Nguyen Phuc Dien",
    "Nguyen Trung Duc",
    "Nguyen Le Gia Han",
    "Nguyen Phuong Hien",
    "Nguyen Hoang Gia Huynh",
    "Duong Gia Hung",
    "Dinh Van Hung",
    "Le Dinh Khoi",
    "Nguyen Thi Ngoc Lan",
    "Huynh Dang Khanh Linh",
    "Pham Vu Thuy Linh",
    "Nguyen Bui Yen Linh",
    "Dang Hoang Long",
    "Nguyen Khanh Ly",
    "Tran Hoang Minh",
    "Tran Nu Nguyet Nga",
    "Tran Nhu Ngoc",
    "Le Thi Nhu Ngoc",
    "Tran Nu Bao Ngoc",
    "Tran Hoang Nguyen",
    "Nguyen Thao Nguyen",
    "Phan Duy Nguyen",
    "Nguyen Thi Thanh Nhan",
    "Bui Thien Nhan",
    "Nguyen Ngoc Uyen Nhi",
    "Vu Nguyen Tue Nhi",
    "Nguyen Hoang Tam Nhu",
    "Le Kim Phat",
    "Nguyen Ba Phi",
    "Dinh Xuan Hoang Phuc",
    "Ta Pham Minh Phuc",
    "Tran Huu Quang",
    "Nguyen Tien Sang",
    "Tran Minh Thong",
    "Vu Le Phuong Thuy",
    "Vo Bao Thuy",
    "Nguyen Anh Thu",
    "Le Trinh Anh Thu",
    "Pham Anh Thu",
    "Nguyen Thuy Tien",
    "Nguyen Phuong Uyen",
    "Vu Thi Ha Vy",
];

#[derive(Debug, Clone)]
pub struct Roster {
    names: Vec<String>,
}

impl Default for Roster {
    fn default() -> Self {
        Self::new(STUDENTS.iter().map(|s| s.to_string()).collect())
    }
}

impl Roster {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Case-insensitive substring search, in roster order. An empty query
    /// returns everyone.
    pub fn search(&self, query: &str) -> Vec<&str> {
        let needle = query.trim().to_lowercase();
        self.names
            .iter()
            .filter(|name| name.to_lowercase().contains(&needle))
            .map(String::as_str)
            .collect()
    }

    /// Exact roster lookup, ignoring case and surrounding whitespace.
    /// Returns the name as spelled on the roster.
    pub fn find(&self, name: &str) -> Option<&str> {
        let name = name.trim();
        self.names
            .iter()
            .find(|n| n.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// Up to three closest roster names for a name that was not found.
    pub fn suggest(&self, name: &str) -> Vec<&str> {
        let matcher = SkimMatcherV2::default();
        let mut scored: Vec<(i64, &str)> = self
            .names
            .iter()
            .filter_map(|n| matcher.fuzzy_match(n, name.trim()).map(|score| (score, n.as_str())))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|(_, n)| n)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_roster() {
        let roster = Roster::default();
        assert_eq!(roster.names().len(), 52);
        assert_eq!(roster.names()[0], "Hoa Quang An");
    }

    #[test]
    fn test_search_is_case_insensitive_and_ordered() {
        let roster = Roster::default();
        let found = roster.search("ANH THU");
        assert_eq!(found, vec!["Nguyen Anh Thu", "Le Trinh Anh Thu", "Pham Anh Thu"]);
        assert_eq!(roster.search("").len(), 52);
        assert!(roster.search("zzz").is_empty());
    }

    #[test]
    fn test_find_returns_roster_spelling() {
        let roster = Roster::default();
        assert_eq!(roster.find("  vu thi ha vy "), Some("Vu Thi Ha Vy"));
        assert_eq!(roster.find("Vu Thi"), None);
    }

    #[test]
    fn test_suggest_close_names() {
        let roster = Roster::default();
        let suggestions = roster.suggest("Tran Hoang Min");
        assert!(!suggestions.is_empty());
        assert!(suggestions.len() <= 3);
        assert_eq!(suggestions[0], "Tran Hoang Minh");
    }
}
