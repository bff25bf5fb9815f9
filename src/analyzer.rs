//! Directive analysis: free text in, a task plan out.
//!
//! The analyzer is pure and deterministic. Given the same directive and
//! roster it always produces the same plan; ids are only generated when the
//! plan is materialised into a `Workflow`.
//!
//! ## Routing
//!
//! The manager is picked in this order:
//! - **Explicit worker**: a roster name mentioned as a whole word
//! - **Department keywords**: docs/devops, then frontend, then backend
//! - **Fallback**: the roster's manager
//!
//! ## Example
//!
//! ```
//! use overseer::analyzer::DirectiveAnalyzer;
//!
//! let plan = DirectiveAnalyzer::default().analyze("create a landing page");
//! assert_eq!(plan.manager, "Nova");
//! assert!(plan.requires_clarification);
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::core::TaskKind;
use crate::roster::{Department, Roster};
use crate::workflow::ClarifyingQuestion;

/// Creation verbs; the phrase after the first one is the deliverable.
static DELIVERABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:create|build|make|design|develop|write|implement|draft|prepare|set up|deploy)\s+(?:(?:an?|the)\s+)?(.+)$",
    )
    .unwrap()
});

/// A `stem.ext` token whose extension is a deliverable file type.
static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b([\w-]+)\.(?:html?|md|markdown|css|scss|js|mjs|ts|tsx|jsx|json|txt|ya?ml|toml|xml|sql|csv|pdf|docx?|svg|png|py|rs|sh)\b",
    )
    .unwrap()
});

/// Stems that name a framework or runtime rather than a file ("Node.js").
const FRAMEWORK_STEMS: &[&str] = &[
    "node", "vue", "next", "nuxt", "express", "react", "angular", "svelte", "three", "chart",
    "d3", "ember", "backbone", "socket", "deno", "nest", "alpine", "p5",
];

static SCOPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:with|including|include|includes|containing|covering|sections?|features?)\b")
        .unwrap()
});

static TIMELINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:today|tonight|tomorrow|asap|urgent|deadline|eod|eow|(?:this|next) (?:week|month)|by \w+day)\b",
    )
    .unwrap()
});

static DOCS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:doc|docs|document|documentation|readme|guide|wiki|handbook)\b").unwrap()
});

static DEVOPS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:devops|deploy|deployment|infrastructure|infra|ci|pipeline|docker|kubernetes|server|monitoring)\b",
    )
    .unwrap()
});

static FRONTEND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:frontend|front-end|ui|ux|landing page|page|website|component|css|layout|react|dashboard)\b",
    )
    .unwrap()
});

static BACKEND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:backend|back-end|api|endpoint|database|db|schema|sql|migration|service|auth)\b",
    )
    .unwrap()
});

/// Kind of work a directive asks for. Picks the task template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Docs,
    Devops,
    Frontend,
    Backend,
    General,
}

impl Focus {
    /// Keyword buckets in priority order.
    fn from_keywords(directive: &str) -> Option<Self> {
        [
            (&*DOCS_RE, Focus::Docs),
            (&*DEVOPS_RE, Focus::Devops),
            (&*FRONTEND_RE, Focus::Frontend),
            (&*BACKEND_RE, Focus::Backend),
        ]
        .into_iter()
        .find(|(re, _)| re.is_match(directive))
        .map(|(_, focus)| focus)
    }

    fn from_department(department: Department) -> Self {
        match department {
            Department::Management => Focus::General,
            Department::Infrastructure => Focus::Docs,
            Department::Frontend => Focus::Frontend,
            Department::Backend => Focus::Backend,
        }
    }

    fn department(self) -> Option<Department> {
        match self {
            Focus::Docs | Focus::Devops => Some(Department::Infrastructure),
            Focus::Frontend => Some(Department::Frontend),
            Focus::Backend => Some(Department::Backend),
            Focus::General => None,
        }
    }
}

/// A task before it has an id. `depends_on` indexes into the same list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub kind: TaskKind,
    pub title: String,
    pub description: String,
    pub assigned_agent: String,
    pub depends_on: Vec<usize>,
}

impl TaskSpec {
    fn specialist(title: String, description: String, agent: &str) -> Self {
        Self {
            kind: TaskKind::Specialist,
            title,
            description,
            assigned_agent: agent.to_string(),
            depends_on: Vec::new(),
        }
    }

    fn after(mut self, index: usize) -> Self {
        self.depends_on.push(index);
        self
    }
}

/// Everything the analyzer decided about a directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectivePlan {
    /// Candidate manager: owns the brief and the review.
    pub manager: String,
    pub explicit_worker: Option<String>,
    pub department: Option<Department>,
    pub deliverable: String,
    pub requires_clarification: bool,
    pub questions: Vec<ClarifyingQuestion>,
    /// Present iff clarification is required.
    pub brief_task: Option<TaskSpec>,
    pub specialist_tasks: Vec<TaskSpec>,
}

pub struct DirectiveAnalyzer {
    roster: Roster,
    /// Whole-word, case-insensitive matcher per roster worker.
    name_patterns: Vec<(String, Regex)>,
}

impl DirectiveAnalyzer {
    pub fn new(roster: Roster) -> Self {
        let name_patterns = roster
            .workers()
            .iter()
            .filter(|w| !w.name.trim().is_empty())
            .filter_map(|w| {
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(w.name.trim())))
                    .ok()
                    .map(|re| (w.name.clone(), re))
            })
            .collect();
        Self {
            roster,
            name_patterns,
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn analyze(&self, directive: &str) -> DirectivePlan {
        let directive = directive.trim();
        let explicit_worker = self.explicit_worker(directive);
        let explicit = explicit_worker
            .as_deref()
            .and_then(|name| self.roster.find(name));

        let focus = Focus::from_keywords(directive)
            .or_else(|| explicit.map(|w| Focus::from_department(w.department)))
            .unwrap_or(Focus::General);

        let manager = match (explicit, focus.department()) {
            (Some(worker), _) => worker.name.clone(),
            (None, Some(department)) => self.roster.for_department(department).name.clone(),
            (None, None) => self.roster.manager().name.clone(),
        };

        let deliverable = deliverable(directive);
        let has_verb = DELIVERABLE_RE.is_match(directive);
        let requires_clarification =
            explicit_worker.is_none() && has_verb && !names_file(directive);

        let questions = if requires_clarification {
            questions(directive, &deliverable)
        } else {
            Vec::new()
        };

        let brief_task = requires_clarification.then(|| TaskSpec {
            kind: TaskKind::ManagerBrief,
            title: format!("Brief: {}", deliverable),
            description: format!(
                "Turn the clarification answers into a working brief for: {}",
                directive
            ),
            assigned_agent: manager.clone(),
            depends_on: Vec::new(),
        });

        let worker = match explicit {
            Some(worker) => worker.name.as_str(),
            None => match focus.department() {
                Some(department) => self.roster.for_department(department).name.as_str(),
                None => manager.as_str(),
            },
        };
        let specialist_tasks = specialist_tasks(focus, &deliverable, directive, worker);

        DirectivePlan {
            manager,
            explicit_worker,
            department: explicit.map(|w| w.department).or(focus.department()),
            deliverable,
            requires_clarification,
            questions,
            brief_task,
            specialist_tasks,
        }
    }

    /// Earliest roster name mentioned in the directive.
    fn explicit_worker(&self, directive: &str) -> Option<String> {
        self.name_patterns
            .iter()
            .filter_map(|(name, re)| re.find(directive).map(|m| (m.start(), name)))
            .min_by_key(|(start, _)| *start)
            .map(|(_, name)| name.clone())
    }
}

impl Default for DirectiveAnalyzer {
    fn default() -> Self {
        Self::new(Roster::default())
    }
}

/// Whether the directive names a concrete output file.
fn names_file(directive: &str) -> bool {
    FILENAME_RE.captures_iter(directive).any(|caps| {
        let stem = caps[1].to_ascii_lowercase();
        !FRAMEWORK_STEMS.contains(&stem.as_str())
    })
}

fn deliverable(directive: &str) -> String {
    DELIVERABLE_RE
        .captures(directive)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end_matches(['.', '!', '?', ',', ';', ' ']).trim())
        .filter(|d| !d.is_empty())
        .unwrap_or(directive)
        .to_string()
}

fn questions(directive: &str, deliverable: &str) -> Vec<ClarifyingQuestion> {
    let mut questions = vec![ClarifyingQuestion::new(
        "filename",
        &format!("What filename should the {} be saved as?", deliverable),
    )];
    if !SCOPE_RE.is_match(directive) {
        questions.push(ClarifyingQuestion::new(
            "scope",
            &format!("What should the {} include?", deliverable),
        ));
    }
    if !TIMELINE_RE.is_match(directive) {
        questions.push(ClarifyingQuestion::new(
            "timeline",
            &format!("When do you need the {}?", deliverable),
        ));
    }
    questions
}

fn implement_api_title(deliverable: &str) -> String {
    let has_suffix = deliverable
        .rsplit(' ')
        .next()
        .is_some_and(|last| last.eq_ignore_ascii_case("api"));
    if has_suffix {
        format!("Implement {}", deliverable)
    } else {
        format!("Implement {} API", deliverable)
    }
}

fn specialist_tasks(focus: Focus, deliverable: &str, directive: &str, worker: &str) -> Vec<TaskSpec> {
    let d = deliverable;
    match focus {
        Focus::Docs => vec![TaskSpec::specialist(
            format!("Write {}", d),
            format!("Write and save the {} requested in: {}", d, directive),
            worker,
        )],
        Focus::Devops => vec![
            TaskSpec::specialist(
                format!("Plan deployment for {}", d),
                format!("Lay out environments, steps and rollback for {}", d),
                worker,
            ),
            TaskSpec::specialist(
                format!("Roll out {}", d),
                format!("Execute the deployment plan for {}", d),
                worker,
            )
            .after(0),
        ],
        Focus::Frontend => vec![
            TaskSpec::specialist(
                format!("Design {} layout", d),
                format!("Sketch structure and sections of the {}", d),
                worker,
            ),
            TaskSpec::specialist(
                format!("Implement {}", d),
                format!("Build the {} from the approved layout", d),
                worker,
            )
            .after(0),
        ],
        Focus::Backend => vec![
            TaskSpec::specialist(
                format!("Design data model for {}", d),
                format!("Define entities, fields and relations for {}", d),
                worker,
            ),
            TaskSpec::specialist(
                implement_api_title(d),
                format!("Expose the {} data model through an API", d),
                worker,
            )
            .after(0),
        ],
        Focus::General => vec![TaskSpec::specialist(
            format!("Deliver {}", d),
            format!("Produce the outcome requested in: {}", directive),
            worker,
        )],
    }
}
