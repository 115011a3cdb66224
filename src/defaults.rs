use crate::models::{Difficulty, Exam, Module, ModuleIcon, Question, QuestionBank, SubTopic};

fn sub(title: &str, content: &[&str]) -> SubTopic {
    SubTopic {
        title: title.to_string(),
        content: content.iter().map(|c| c.to_string()).collect(),
    }
}

fn module(id: i64, title: &str, icon: ModuleIcon, color: &str, subs: Vec<SubTopic>) -> Module {
    Module {
        id,
        title: title.to_string(),
        icon,
        color: color.to_string(),
        sub_topics: subs,
    }
}

fn question(id: &str, text: &str, options: [&str; 4], answer: usize, difficulty: Difficulty) -> Question {
    Question {
        id: id.to_string(),
        question: text.to_string(),
        options: options.iter().map(|o| o.to_string()).collect(),
        correct_answer: options[answer].to_string(),
        explanation: None,
        difficulty: Some(difficulty),
    }
}

pub fn default_exams() -> Vec<Exam> {
    vec![
        Exam {
            id: 1,
            title: "Security Fundamentals".into(),
            description: "Core concepts every analyst needs".into(),
            modules: vec![
                module(
                    1,
                    "Network Security",
                    ModuleIcon::Network,
                    "blue",
                    vec![
                        sub("Firewalls", &["Packet Filtering", "Stateful Inspection"]),
                        sub("VPNs", &["IPsec", "TLS VPNs"]),
                    ],
                ),
                module(
                    2,
                    "Web Security",
                    ModuleIcon::Code,
                    "orange",
                    vec![sub("SQL Injection", &[]), sub("Cross-Site Scripting", &["Stored XSS"])],
                ),
            ],
        },
        Exam {
            id: 2,
            title: "Applied Cryptography".into(),
            description: "Primitives and how they fail".into(),
            modules: vec![module(
                3,
                "Cryptography",
                ModuleIcon::Lock,
                "purple",
                vec![sub("Hashing", &["Salting"]), sub("Symmetric Ciphers", &[])],
            )],
        },
    ]
}

pub fn default_bank() -> QuestionBank {
    let mut bank = QuestionBank::new();
    bank.entry(1).or_default().insert(
        "Firewalls".into(),
        vec![
            question(
                "seed-fw-1",
                "What does a stateful firewall track that a packet filter does not?",
                ["Connection state", "MAC addresses", "User passwords", "DNS records"],
                0,
                Difficulty::Low,
            ),
            question(
                "seed-fw-2",
                "Which default policy is recommended for inbound traffic?",
                ["Allow all", "Deny all", "Log only", "Rate limit"],
                1,
                Difficulty::Medium,
            ),
        ],
    );
    bank.entry(2).or_default().insert(
        "SQL Injection".into(),
        vec![question(
            "seed-sqli-1",
            "Which technique prevents SQL injection most reliably?",
            ["Input length limits", "Parameterized queries", "Client-side validation", "URL encoding"],
            1,
            Difficulty::Low,
        )],
    );
    bank.entry(3).or_default().insert(
        "Hashing::Salting".into(),
        vec![question(
            "seed-salt-1",
            "What attack does a per-user salt primarily defeat?",
            ["Phishing", "Precomputed rainbow tables", "Replay", "Side channels"],
            1,
            Difficulty::Advanced,
        )],
    );
    bank
}
