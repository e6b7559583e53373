mod rewrite_command;
