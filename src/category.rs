//! Static subject taxonomy and synonym-based classification.
//!
//! Matching folds case and strips diacritics (NFD, then drop combining marks) on both
//! sides, and requires word boundaries so `uro` does not fire inside `microurologia`.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use crate::video::VideoRecord;

/// Canonical category name → synonyms.
pub const TAXONOMY: &[(&str, &[&str])] = &[
  ("Andrologia", &["andrologia", "andrology", "infertilità maschile", "disfunzione erettile", "varicocele"]),
  ("Cardiologia", &["cardiologia", "cardiology", "cardio", "cuore", "aritmia", "ecocardiografia"]),
  ("Chirurgia Generale", &["chirurgia generale", "general surgery", "colecistectomia", "ernia", "laparoscopia"]),
  ("Ginecologia", &["ginecologia", "gynecology", "gineco", "isterectomia", "endometriosi"]),
  ("Nefrologia", &["nefrologia", "nephrology", "dialisi", "insufficienza renale"]),
  ("Oncologia", &["oncologia", "oncology", "tumore", "carcinoma", "neoplasia", "chemioterapia"]),
  ("Pediatria", &["pediatria", "pediatrics", "neonato", "neonatale", "pediatrico"]),
  ("Urologia", &["urologia", "urology", "uro", "prostata", "prostatectomia", "vescica", "calcolosi", "nefrectomia"]),
];

struct CategoryMatcher {
  name: &'static str,
  pattern: Regex,
}

static MATCHERS: LazyLock<Vec<CategoryMatcher>> = LazyLock::new(|| {
  TAXONOMY
    .iter()
    .filter_map(|(name, synonyms)| {
      let alternatives: Vec<String> = synonyms.iter().map(|s| regex::escape(&fold(s))).collect();
      // Escaped literals joined with `|` always form a valid pattern.
      Regex::new(&format!(r"\b(?:{})\b", alternatives.join("|"))).ok().map(|pattern| CategoryMatcher { name, pattern })
    })
    .collect()
});

/// Lower-case and strip diacritics.
pub fn fold(text: &str) -> String {
  text.nfd().filter(|c| !is_combining_mark(*c)).collect::<String>().to_lowercase()
}

/// Canonical categories for `video`: tag matches unioned with name+description matches.
pub fn video_categories(video: &VideoRecord) -> Vec<String> {
  let tags: Vec<String> = video.tags.iter().map(|t| fold(t)).collect();
  let text = fold(&format!("{} {}", video.name, video.description));
  let mut found = BTreeSet::new();
  for matcher in MATCHERS.iter() {
    if tags.iter().any(|t| matcher.pattern.is_match(t)) || matcher.pattern.is_match(&text) {
      found.insert(matcher.name.to_string());
    }
  }
  found.into_iter().collect()
}

/// Sorted union of categories over `videos`.
pub fn available_categories(videos: &[VideoRecord]) -> Vec<String> {
  videos.iter().flat_map(video_categories).collect::<BTreeSet<_>>().into_iter().collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_taxonomy_entry_compiles() {
    assert_eq!(MATCHERS.len(), TAXONOMY.len());
  }

  #[test]
  fn fold_strips_accents_and_case() {
    assert_eq!(fold("Infertilità MASCHILE"), "infertilita maschile");
    assert_eq!(fold("Écho"), "echo");
  }

  #[test]
  fn exact_short_synonym_tag_matches() {
    let v = VideoRecord::new("1", "Sessione").with_tags(["uro"]);
    assert_eq!(video_categories(&v), vec!["Urologia"]);
  }

  #[test]
  fn synonym_inside_longer_word_does_not_match() {
    let v = VideoRecord::new("1", "Sessione").with_tags(["microurologia"]);
    assert!(video_categories(&v).is_empty());
  }

  #[test]
  fn falls_back_to_name_and_description() {
    let v = VideoRecord::new("1", "Live surgery").with_description("Isterectomia laparoscopica totale");
    assert_eq!(video_categories(&v), vec!["Ginecologia"]);
  }

  #[test]
  fn diacritic_insensitive_on_both_sides() {
    let v = VideoRecord::new("1", "Webinar").with_tags(["Infertilita maschile"]);
    assert_eq!(video_categories(&v), vec!["Andrologia"]);
  }

  #[test]
  fn multiple_categories_are_unioned_without_duplicates() {
    let v = VideoRecord::new("1", "Tumore della prostata").with_tags(["urologia", "oncologia", "uro"]);
    assert_eq!(video_categories(&v), vec!["Oncologia", "Urologia"]);
  }

  #[test]
  fn available_categories_sorted_union() {
    let videos = vec![
      VideoRecord::new("1", "a").with_tags(["pediatria"]),
      VideoRecord::new("2", "b").with_tags(["cuore"]),
      VideoRecord::new("3", "c").with_tags(["cardio"]),
    ];
    assert_eq!(available_categories(&videos), vec!["Cardiologia", "Pediatria"]);
  }
}
