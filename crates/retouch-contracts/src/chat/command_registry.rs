#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "edit_model",
        action: "set_edit_model",
    },
    CommandSpec {
        command: "text_model",
        action: "set_text_model",
    },
    CommandSpec {
        command: "tool",
        action: "set_tool",
    },
];

pub(crate) const PROMPT_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "filter",
        action: "filter",
    },
    CommandSpec {
        command: "adjust",
        action: "adjust",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "upload",
    action: "upload",
}];

pub(crate) const REGION_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "fill",
        action: "magic_fill",
    },
    CommandSpec {
        command: "crop",
        action: "crop",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "new",
        action: "start_over",
    },
    CommandSpec {
        command: "undo",
        action: "undo",
    },
    CommandSpec {
        command: "redo",
        action: "redo",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "compare",
        action: "cycle_compare",
    },
    CommandSpec {
        command: "compare_to",
        action: "toggle_compare_target",
    },
    CommandSpec {
        command: "describe",
        action: "describe",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "prompts",
        action: "show_prompts",
    },
    CommandSpec {
        command: "prompts_clear",
        action: "clear_prompts",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

pub(crate) const RETOUCH_COMMAND: CommandSpec = CommandSpec {
    command: "retouch",
    action: "retouch",
};

pub(crate) const UPSCALE_COMMAND: CommandSpec = CommandSpec {
    command: "upscale",
    action: "upscale",
};

pub(crate) const EXPORT_COMMAND: CommandSpec = CommandSpec {
    command: "export",
    action: "export",
};

pub(crate) const DEFAULT_UPSCALE_FACTOR: u64 = 2;

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/upload",
    "/new",
    "/retouch",
    "/filter",
    "/adjust",
    "/fill",
    "/crop",
    "/upscale",
    "/undo",
    "/redo",
    "/reset",
    "/compare",
    "/compare_to",
    "/tool",
    "/describe",
    "/status",
    "/prompts",
    "/prompts_clear",
    "/edit_model",
    "/text_model",
    "/export",
    "/help",
];
