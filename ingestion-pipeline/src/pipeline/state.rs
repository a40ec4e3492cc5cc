use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Extracted, Chunked, Embedded, Persisted, Failed],
    events {
        extract { transition: { from: Ready, to: Extracted } }
        chunk { transition: { from: Extracted, to: Chunked } }
        embed { transition: { from: Chunked, to: Embedded } }
        persist { transition: { from: Embedded, to: Persisted } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Extracted, to: Failed }
            transition: { from: Chunked, to: Failed }
            transition: { from: Embedded, to: Failed }
            transition: { from: Persisted, to: Failed }
        }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
